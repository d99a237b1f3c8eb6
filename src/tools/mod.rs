// Tool execution system
//
// Hosts provide tools, the registry routes names to hosts, and the
// permission store plus approval gate decide whether a call may run.

pub mod approval;
pub mod builtin;
pub mod hosts;
pub mod permissions;
pub mod registry;
pub mod schema;
pub mod types;

pub use approval::{AllowAll, ApprovalDecision, ApprovalGate, ApprovalRequest, DenyAll};
pub use builtin::{BuiltinHost, Tool};
pub use hosts::{HostConfig, ToolHost, ToolHostManager, TransportKind};
pub use permissions::{permission_key, PermissionRecord, PermissionStore};
pub use registry::{RegisteredTool, ToolRegistry};
pub use types::{ToolDescriptor, ToolInputSchema, ToolOutput};
