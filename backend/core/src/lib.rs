pub mod error;
pub mod event;
pub mod protocol;
pub mod traits;
pub mod types;

pub use error::{ProtocolError, UpdateSchemaError};
pub use event::{EmitReport, EventDelivery, EventFilter, HubEvent, SubscriptionId, ANY_EVENT_TYPE};
pub use protocol::{
    EmitEventOptions, ExecuteOperationOptions, ExecuteRemoteOperationOptions,
    IdentifyAppOptions, InspectPluginResult, InstallPluginOptions, ListPluginsResult,
    OperationResult, PluginInfo, PluginState, RegisterAppOptions, RegisterAppResult,
    RemoteOperationRequest, RemoteOperationResponse, SessionInfo, SubscribeToEventOptions,
    SubscribeToEventResult, UnsubscribeFromEventOptions, UpdateSchemaOptions,
};
pub use traits::{AppCallbacks, CallbackExecutor, CallbackOutcome, PluginManagement, Storage};
pub use types::{App, AppSchema, NewApp, PluginRecord, PluginStatus};
