use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use anyhow::{Result, bail};
use async_trait::async_trait;
use storehub_core::{
    AppCallbacks, CallbackOutcome, EmitEventOptions, EmitReport, EventDelivery,
    ExecuteOperationOptions, ExecuteRemoteOperationOptions, IdentifyAppOptions,
    InspectPluginResult, InstallPluginOptions, ListPluginsResult, NewApp, OperationResult,
    PluginManagement, ProtocolError, RegisterAppOptions, RegisterAppResult,
    RemoteOperationRequest, SessionInfo, SubscribeToEventOptions, SubscribeToEventResult,
    UnsubscribeFromEventOptions, UpdateSchemaError, UpdateSchemaOptions,
};
use storehub_events::EventSink;
use storehub_logging::redact_sensitive_data;
use storehub_security::check_app_schema;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::SessionContext;
use crate::listener::{AppIdentified, SessionListener};

pub type SessionId = Uuid;

#[derive(Debug, Clone)]
struct IdentifiedApp {
    identifier: String,
    remote: bool,
}

/// One connected app, or an anonymous caller that has not identified yet.
pub struct Session {
    id: SessionId,
    me: Weak<Session>,
    context: Arc<SessionContext>,
    callbacks: Option<Arc<dyn AppCallbacks>>,
    identified_app: RwLock<Option<IdentifiedApp>>,
    destroyed: AtomicBool,
    listeners: RwLock<Vec<Arc<dyn SessionListener>>>,
}

impl Session {
    /// Create a session. `callbacks` is the surface the hub calls back into
    /// for remote operations and event delivery.
    pub fn new(
        context: Arc<SessionContext>,
        callbacks: Option<Arc<dyn AppCallbacks>>,
    ) -> Arc<Session> {
        Arc::new_cyclic(|me| Session {
            id: Uuid::new_v4(),
            me: me.clone(),
            context,
            callbacks,
            identified_app: RwLock::new(None),
            destroyed: AtomicBool::new(false),
            listeners: RwLock::new(Vec::new()),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn handle(&self) -> Weak<Session> {
        self.me.clone()
    }

    pub fn callbacks(&self) -> Option<Arc<dyn AppCallbacks>> {
        self.callbacks.clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn identified_app(&self) -> Option<String> {
        self.identified().map(|app| app.identifier)
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn identified(&self) -> Option<IdentifiedApp> {
        self.identified_app
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn listeners(&self) -> Vec<Arc<dyn SessionListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn ensure_alive(&self) -> Result<(), ProtocolError> {
        if self.is_destroyed() {
            return Err(ProtocolError::SessionDestroyed);
        }
        Ok(())
    }

    fn require_identified(&self) -> Result<IdentifiedApp, ProtocolError> {
        self.identified().ok_or(ProtocolError::NotIdentified)
    }

    fn plugins(&self) -> Result<Arc<dyn PluginManagement>, ProtocolError> {
        self.context.plugins().ok_or(ProtocolError::NotFound)
    }

    pub async fn register_app(
        &self,
        options: RegisterAppOptions,
    ) -> Result<RegisterAppResult, ProtocolError> {
        self.ensure_alive()?;
        let storage = &self.context.storage;
        if storage
            .get_app(&options.name)
            .await
            .map_err(ProtocolError::storage)?
            .is_some()
        {
            return Err(ProtocolError::AppAlreadyExists);
        }

        let token = self
            .context
            .access_tokens
            .create_token()
            .await
            .map_err(ProtocolError::internal)?;

        let created = storage
            .create_app(NewApp {
                identifier: options.name.clone(),
                access_key_hash: token.hashed_token().to_string(),
                is_remote: options.remote,
            })
            .await;
        if let Err(e) = created {
            // Lost a race against a concurrent registration of the same name.
            if let Ok(Some(_)) = storage.get_app(&options.name).await {
                return Err(ProtocolError::AppAlreadyExists);
            }
            return Err(ProtocolError::storage(e));
        }
        info!(session = %self.id, app = %options.name, remote = options.remote, "App registered");

        let access_token = token.into_plain_text();
        if options.identify {
            self.identify_app(IdentifyAppOptions {
                name: options.name,
                access_token: access_token.clone(),
            })
            .await?;
        }
        Ok(RegisterAppResult { access_token })
    }

    pub async fn identify_app(&self, options: IdentifyAppOptions) -> Result<(), ProtocolError> {
        self.ensure_alive()?;
        let app = self
            .context
            .storage
            .get_app(&options.name)
            .await
            .map_err(ProtocolError::storage)?;

        // Unknown name and wrong token must be indistinguishable.
        let Some(app) = app else {
            return Err(ProtocolError::InvalidAccessToken);
        };
        let valid = self
            .context
            .access_tokens
            .validate_token(&app.access_key_hash, &options.access_token)
            .await;
        if !valid {
            return Err(ProtocolError::InvalidAccessToken);
        }

        let identified = IdentifiedApp {
            identifier: app.identifier.clone(),
            remote: app.is_remote,
        };
        *self
            .identified_app
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(identified.clone());
        info!(session = %self.id, app = %identified.identifier, "App identified");

        let event = AppIdentified {
            identifier: identified.identifier,
            remote: identified.remote,
        };
        for listener in self.listeners() {
            listener.on_app_identified(self, &event).await;
        }
        Ok(())
    }

    pub fn get_session_info(&self) -> SessionInfo {
        SessionInfo {
            app_identifier: self.identified_app(),
        }
    }

    /// Run a storage operation directly. Authorization is up to the storage.
    pub async fn execute_operation(
        &self,
        options: ExecuteOperationOptions,
    ) -> Result<OperationResult, ProtocolError> {
        self.ensure_alive()?;
        let Some((head, args)) = options.operation.split_first() else {
            return Err(ProtocolError::storage("operation is empty"));
        };
        let Some(name) = head.as_str() else {
            return Err(ProtocolError::storage("operation name must be a string"));
        };

        debug!(session = %self.id, operation = %name, "Executing storage operation");
        let result = self
            .context
            .storage
            .run_operation(name, args)
            .await
            .map_err(|e| {
                warn!(
                    session = %self.id,
                    operation = %name,
                    error = %redact_sensitive_data(&format!("{e:#}")),
                    "Storage operation failed"
                );
                ProtocolError::storage(e)
            })?;
        Ok(OperationResult { result })
    }

    pub async fn update_schema(&self, options: UpdateSchemaOptions) -> Result<(), ProtocolError> {
        self.ensure_alive()?;
        let Some(app) = self.identified() else {
            return Err(ProtocolError::schema(
                UpdateSchemaError::NotAllowed,
                "Could not update schema: app not identified",
            ));
        };
        check_app_schema(&options.schema, &app.identifier)?;

        let storage = &self.context.storage;
        let merged = storage
            .update_app_schema(&app.identifier, &options.schema)
            .await
            .map_err(ProtocolError::storage)?;
        storage
            .apply_schema(&app.identifier, &merged)
            .await
            .map_err(ProtocolError::storage)?;
        info!(
            app = %app.identifier,
            collections = merged.collection_definitions.len(),
            "Schema updated"
        );
        Ok(())
    }

    /// Forward an operation to another identified app's callback surface.
    pub async fn execute_remote_operation(
        &self,
        options: ExecuteRemoteOperationOptions,
    ) -> Result<OperationResult, ProtocolError> {
        self.ensure_alive()?;
        let app = self.require_identified()?;

        let request = RemoteOperationRequest {
            source_app: app.identifier.clone(),
            operation: options.operation,
        };
        match self
            .context
            .executor
            .handle_remote_operation(&options.app, request)
            .await
        {
            CallbackOutcome::Success(response) => Ok(OperationResult {
                result: response.result,
            }),
            CallbackOutcome::AppNotFound => {
                debug!(source = %app.identifier, target = %options.app, "Remote target not found");
                Err(ProtocolError::AppNotFound)
            }
        }
    }

    pub async fn subscribe_to_event(
        &self,
        options: SubscribeToEventOptions,
    ) -> Result<SubscribeToEventResult, ProtocolError> {
        self.ensure_alive()?;
        let target: Weak<dyn EventSink> = self.me.clone();
        let subscription_id = self
            .context
            .events
            .subscribe(self.id, options.request, target)
            .await;
        Ok(SubscribeToEventResult { subscription_id })
    }

    pub async fn unsubscribe_from_event(
        &self,
        options: UnsubscribeFromEventOptions,
    ) -> Result<(), ProtocolError> {
        self.ensure_alive()?;
        if self
            .context
            .events
            .unsubscribe(self.id, &options.subscription_id)
            .await
        {
            Ok(())
        } else {
            Err(ProtocolError::NotFound)
        }
    }

    /// Emit an event on behalf of this session. The source app is stamped from
    /// the identified app, overriding whatever the caller supplied.
    pub async fn emit_event(&self, options: EmitEventOptions) -> Result<EmitReport, ProtocolError> {
        self.ensure_alive()?;
        let mut event = options.event;
        event.source_app = self.identified_app();
        Ok(self.context.events.emit(event).await)
    }

    pub async fn list_plugins(&self) -> Result<ListPluginsResult, ProtocolError> {
        self.ensure_alive()?;
        self.plugins()?.list_plugins().await
    }

    pub async fn install_plugin(&self, options: InstallPluginOptions) -> Result<(), ProtocolError> {
        self.ensure_alive()?;
        self.plugins()?.install_plugin(options).await
    }

    pub async fn inspect_plugin(
        &self,
        identifier: &str,
    ) -> Result<InspectPluginResult, ProtocolError> {
        self.ensure_alive()?;
        self.plugins()?.inspect_plugin(identifier).await
    }

    pub async fn enable_plugin(&self, identifier: &str) -> Result<(), ProtocolError> {
        self.ensure_alive()?;
        self.plugins()?.enable_plugin(identifier).await
    }

    pub async fn disable_plugin(&self, identifier: &str) -> Result<(), ProtocolError> {
        self.ensure_alive()?;
        self.plugins()?.disable_plugin(identifier).await
    }

    /// Tear the session down. Subscriptions are gone before this returns; later calls are no-ops.
    pub async fn destroy_session(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let removed = self.context.events.remove_owner(self.id).await;
        debug!(session = %self.id, subscriptions = removed, "Session destroyed");
        for listener in self.listeners() {
            listener.on_session_destroyed(self).await;
        }
    }
}

#[async_trait]
impl EventSink for Session {
    async fn deliver(&self, delivery: EventDelivery) -> Result<()> {
        if self.is_destroyed() {
            bail!("session {} is destroyed", self.id);
        }
        let Some(callbacks) = &self.callbacks else {
            bail!("session {} has no callback surface", self.id);
        };
        callbacks.handle_event(delivery).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionRegistry;
    use serde_json::json;
    use std::sync::Mutex;
    use storehub_core::{AppSchema, EventFilter, HubEvent, RemoteOperationResponse, Storage};
    use storehub_events::EventBus;
    use storehub_security::Argon2AccessTokenManager;
    use storehub_storage::SqliteStorage;

    #[derive(Default)]
    struct RecordingCallbacks {
        events: Mutex<Vec<EventDelivery>>,
        requests: Mutex<Vec<RemoteOperationRequest>>,
    }

    #[async_trait]
    impl AppCallbacks for RecordingCallbacks {
        async fn handle_remote_operation(
            &self,
            request: RemoteOperationRequest,
        ) -> Result<RemoteOperationResponse> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(RemoteOperationResponse {
                result: json!({"echo": request.operation}),
            })
        }

        async fn handle_event(&self, delivery: EventDelivery) -> Result<()> {
            self.events.lock().unwrap().push(delivery);
            Ok(())
        }
    }

    struct Hub {
        context: Arc<SessionContext>,
        registry: Arc<SessionRegistry>,
        storage: Arc<SqliteStorage>,
    }

    impl Hub {
        fn new() -> Self {
            let storage = Arc::new(SqliteStorage::in_memory().unwrap());
            let registry = Arc::new(SessionRegistry::new());
            let context = Arc::new(SessionContext::new(
                Arc::new(Argon2AccessTokenManager::with_token_length(12)),
                storage.clone(),
                Arc::new(EventBus::new()),
                registry.clone(),
            ));
            Self {
                context,
                registry,
                storage,
            }
        }

        fn open(&self, callbacks: Option<Arc<dyn AppCallbacks>>) -> Arc<Session> {
            let session = Session::new(self.context.clone(), callbacks);
            session.add_listener(self.registry.clone());
            session
        }
    }

    fn register(name: &str, identify: bool) -> RegisterAppOptions {
        RegisterAppOptions {
            name: name.into(),
            remote: false,
            identify,
        }
    }

    #[tokio::test]
    async fn test_register_twice_keeps_first_token() {
        let hub = Hub::new();
        let session = hub.open(None);
        let first = session.register_app(register("memex", false)).await.unwrap();
        let hash_before = hub.storage.get_app("memex").await.unwrap().unwrap().access_key_hash;

        let second = session.register_app(register("memex", false)).await;
        assert_eq!(second, Err(ProtocolError::AppAlreadyExists));

        let app = hub.storage.get_app("memex").await.unwrap().unwrap();
        assert_eq!(app.access_key_hash, hash_before);
        assert!(!app.access_key_hash.contains(&first.access_token));
    }

    #[tokio::test]
    async fn test_register_with_identify() {
        let hub = Hub::new();
        let session = hub.open(None);
        assert_eq!(session.get_session_info().app_identifier, None);

        session.register_app(register("memex", true)).await.unwrap();
        assert_eq!(session.get_session_info().app_identifier.as_deref(), Some("memex"));
        assert!(hub.registry.get("memex").await.is_some());
    }

    #[tokio::test]
    async fn test_identify_failures_are_indistinguishable() {
        let hub = Hub::new();
        let session = hub.open(None);
        session.register_app(register("memex", false)).await.unwrap();

        let wrong_token = session
            .identify_app(IdentifyAppOptions {
                name: "memex".into(),
                access_token: "wrong".into(),
            })
            .await;
        let unknown_app = session
            .identify_app(IdentifyAppOptions {
                name: "nobody".into(),
                access_token: "wrong".into(),
            })
            .await;
        assert_eq!(wrong_token, Err(ProtocolError::InvalidAccessToken));
        assert_eq!(wrong_token, unknown_app);
        assert_eq!(session.get_session_info(), SessionInfo::default());
    }

    #[tokio::test]
    async fn test_identify_with_issued_token() {
        let hub = Hub::new();
        let registering = hub.open(None);
        let token = registering
            .register_app(register("memex", false))
            .await
            .unwrap()
            .access_token;

        let session = hub.open(None);
        session
            .identify_app(IdentifyAppOptions {
                name: "memex".into(),
                access_token: token,
            })
            .await
            .unwrap();
        assert_eq!(session.identified_app().as_deref(), Some("memex"));
    }

    #[tokio::test]
    async fn test_identify_binds_after_poisoned_lock() {
        let hub = Hub::new();
        let token = hub
            .open(None)
            .register_app(register("memex", false))
            .await
            .unwrap()
            .access_token;

        let session = hub.open(None);
        let poisoner = session.clone();
        let _ = std::thread::spawn(move || {
            let _slot = poisoner.identified_app.write().unwrap();
            panic!("poison the identity slot");
        })
        .join();
        assert!(session.identified_app.is_poisoned());

        session
            .identify_app(IdentifyAppOptions {
                name: "memex".into(),
                access_token: token,
            })
            .await
            .unwrap();
        assert_eq!(session.identified_app().as_deref(), Some("memex"));
        assert!(hub.registry.get("memex").await.is_some());
    }

    #[tokio::test]
    async fn test_update_schema_requires_identification() {
        let hub = Hub::new();
        let session = hub.open(None);
        let result = session
            .update_schema(UpdateSchemaOptions {
                schema: AppSchema::default(),
            })
            .await;
        match result {
            Err(ProtocolError::SchemaRejected { error_code, .. }) => {
                assert_eq!(error_code, UpdateSchemaError::NotAllowed)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_update_schema_then_use_collection() {
        let hub = Hub::new();
        let session = hub.open(None);
        session.register_app(register("memex", true)).await.unwrap();

        let mut schema = AppSchema::default();
        schema
            .collection_definitions
            .insert("memex:tags".into(), json!({"fields": {"name": {"type": "string"}}}));
        session.update_schema(UpdateSchemaOptions { schema }).await.unwrap();

        session
            .execute_operation(ExecuteOperationOptions {
                operation: vec![json!("createObject"), json!("memex:tags"), json!({"name": "rust"})],
            })
            .await
            .unwrap();
        let found = session
            .execute_operation(ExecuteOperationOptions {
                operation: vec![json!("findObjects"), json!("memex:tags"), json!({"name": "rust"})],
            })
            .await
            .unwrap();
        assert_eq!(found.result.as_array().map(Vec::len), Some(1));

        let app = hub.storage.get_app("memex").await.unwrap().unwrap();
        assert!(app.schema.collection_definitions.contains_key("memex:tags"));
    }

    #[tokio::test]
    async fn test_rejected_schema_is_not_persisted() {
        let hub = Hub::new();
        let session = hub.open(None);
        session.register_app(register("memex", true)).await.unwrap();

        let mut schema = AppSchema::default();
        schema.collection_definitions.insert("memex:ok".into(), json!({}));
        schema.collection_definitions.insert("other:tags".into(), json!({}));
        assert!(session.update_schema(UpdateSchemaOptions { schema }).await.is_err());

        let app = hub.storage.get_app("memex").await.unwrap().unwrap();
        assert!(app.schema.collection_definitions.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_storage_operation_is_typed_error() {
        let hub = Hub::new();
        let session = hub.open(None);
        let result = session
            .execute_operation(ExecuteOperationOptions {
                operation: vec![json!("dropEverything")],
            })
            .await;
        assert!(matches!(result, Err(ProtocolError::StorageError { .. })));

        let result = session
            .execute_operation(ExecuteOperationOptions { operation: vec![] })
            .await;
        assert!(matches!(result, Err(ProtocolError::StorageError { .. })));
    }

    #[tokio::test]
    async fn test_remote_operation_requires_identification() {
        let hub = Hub::new();
        let target = hub.open(Some(Arc::new(RecordingCallbacks::default())));
        target.register_app(register("memex", true)).await.unwrap();

        let anonymous = hub.open(None);
        for app in ["memex", "nobody"] {
            let result = anonymous
                .execute_remote_operation(ExecuteRemoteOperationOptions {
                    app: app.into(),
                    operation: vec![json!("findObjects")],
                })
                .await;
            assert_eq!(result, Err(ProtocolError::NotIdentified));
        }
    }

    #[tokio::test]
    async fn test_remote_operation_round_trip() {
        let hub = Hub::new();
        let callbacks = Arc::new(RecordingCallbacks::default());
        let target = hub.open(Some(callbacks.clone()));
        target.register_app(register("memex", true)).await.unwrap();

        let caller = hub.open(None);
        caller.register_app(register("backup", true)).await.unwrap();

        let result = caller
            .execute_remote_operation(ExecuteRemoteOperationOptions {
                app: "memex".into(),
                operation: vec![json!("findObjects"), json!("tags")],
            })
            .await
            .unwrap();
        assert_eq!(result.result, json!({"echo": ["findObjects", "tags"]}));
        assert_eq!(callbacks.requests.lock().unwrap()[0].source_app, "backup");

        let missing = caller
            .execute_remote_operation(ExecuteRemoteOperationOptions {
                app: "nobody".into(),
                operation: vec![],
            })
            .await;
        assert_eq!(missing, Err(ProtocolError::AppNotFound));
    }

    #[tokio::test]
    async fn test_destroyed_target_is_not_found() {
        let hub = Hub::new();
        let target = hub.open(Some(Arc::new(RecordingCallbacks::default())));
        target.register_app(register("memex", true)).await.unwrap();
        let caller = hub.open(None);
        caller.register_app(register("backup", true)).await.unwrap();

        target.destroy_session().await;
        let result = caller
            .execute_remote_operation(ExecuteRemoteOperationOptions {
                app: "memex".into(),
                operation: vec![],
            })
            .await;
        assert_eq!(result, Err(ProtocolError::AppNotFound));
    }

    #[tokio::test]
    async fn test_subscribe_emit_unsubscribe() {
        let hub = Hub::new();
        let callbacks = Arc::new(RecordingCallbacks::default());
        let subscriber = hub.open(Some(callbacks.clone()));
        let emitter = hub.open(None);
        emitter.register_app(register("memex", true)).await.unwrap();

        let handle = subscriber
            .subscribe_to_event(SubscribeToEventOptions {
                request: EventFilter::event_type("storage-change"),
            })
            .await
            .unwrap();

        let emit = || EmitEventOptions {
            event: HubEvent {
                event_type: "storage-change".into(),
                source_app: Some("spoofed".into()),
                payload: json!({"collection": "memex:tags"}),
            },
        };
        let report = emitter.emit_event(emit()).await.unwrap();
        assert_eq!(report.delivered_count, 1);

        subscriber
            .unsubscribe_from_event(UnsubscribeFromEventOptions {
                subscription_id: handle.subscription_id.clone(),
            })
            .await
            .unwrap();
        let report = emitter.emit_event(emit()).await.unwrap();
        assert_eq!(report.delivered_count, 0);

        let events = callbacks.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].subscription_id, handle.subscription_id);
        assert_eq!(events[0].event.source_app.as_deref(), Some("memex"));

        let again = subscriber
            .unsubscribe_from_event(UnsubscribeFromEventOptions {
                subscription_id: handle.subscription_id.clone(),
            })
            .await;
        assert_eq!(again, Err(ProtocolError::NotFound));
    }

    #[tokio::test]
    async fn test_destroy_removes_subscriptions_and_is_idempotent() {
        let hub = Hub::new();
        let callbacks = Arc::new(RecordingCallbacks::default());
        let subscriber = hub.open(Some(callbacks.clone()));
        let other = hub.open(Some(Arc::new(RecordingCallbacks::default())));
        for session in [&subscriber, &subscriber, &other] {
            session
                .subscribe_to_event(SubscribeToEventOptions {
                    request: EventFilter::event_type("ping"),
                })
                .await
                .unwrap();
        }

        subscriber.destroy_session().await;
        subscriber.destroy_session().await;
        assert!(subscriber.is_destroyed());
        assert_eq!(hub.context.events.subscription_count().await, 1);

        let report = other
            .emit_event(EmitEventOptions {
                event: HubEvent::new("ping", json!(null)),
            })
            .await
            .unwrap();
        assert_eq!(report.delivered_count, 1);
        assert!(callbacks.events.lock().unwrap().is_empty());

        let after = subscriber.register_app(register("late", false)).await;
        assert_eq!(after, Err(ProtocolError::SessionDestroyed));
    }

    #[tokio::test]
    async fn test_plugin_calls_without_manager_are_not_found() {
        let hub = Hub::new();
        let session = hub.open(None);
        assert_eq!(session.list_plugins().await, Err(ProtocolError::NotFound));
        assert_eq!(
            session.inspect_plugin("io.example.test-plugin").await,
            Err(ProtocolError::NotFound)
        );
    }
}
