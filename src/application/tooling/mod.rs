mod error;
mod interface;
mod manager;
mod process;


pub use error::{RegistryError, TransportError};
pub use interface::{ProviderTransport, ToolDescriptor, ToolDispatch, ToolInfo};
pub use manager::{ProviderRegistry, RegistrySettings};
pub use process::StdioTransport;
