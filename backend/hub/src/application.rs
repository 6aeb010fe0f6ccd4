//! Application: owns the storage handle, the live sessions and the plugin
//! manager, and wires them together.
//!
//! Storage that cannot be opened is the only fatal setup error. Plugin
//! reconciliation failures are logged and the hub starts without them.

use std::sync::Arc;

use storehub_config::HubConfig;
use storehub_core::{AppCallbacks, PluginManagement, Storage};
use storehub_events::EventBus;
use storehub_plugins::{
    BuiltinPluginHost, ManifestDiscovery, PluginDiscovery, PluginHost, PluginInstaller,
    PluginManager,
};
use storehub_security::{AccessTokenManager, Argon2AccessTokenManager};
use storehub_session::{Session, SessionContext, SessionRegistry};
use storehub_storage::SqliteStorage;
use tracing::{info, warn};

use crate::error::HubError;
use crate::sessions::SessionHub;

/// Collaborator overrides. Anything left `None` is built from the config.
#[derive(Default)]
pub struct ApplicationDeps {
    pub storage: Option<Arc<dyn Storage>>,
    pub access_tokens: Option<Arc<dyn AccessTokenManager>>,
    pub plugin_host: Option<Arc<dyn PluginHost>>,
    pub discovery: Option<Arc<dyn PluginDiscovery>>,
}

pub struct Application {
    storage: Arc<dyn Storage>,
    events: Arc<EventBus>,
    registry: Arc<SessionRegistry>,
    sessions: Arc<SessionHub>,
    plugins: Arc<PluginManager>,
}

fn open_storage(config: &HubConfig) -> Result<Arc<dyn Storage>, HubError> {
    let storage = match &config.db_path {
        Some(path) => SqliteStorage::open(path).map_err(|error| HubError::Storage {
            path: path.clone(),
            error,
        })?,
        None => {
            info!("No database path configured, using in-memory storage");
            SqliteStorage::in_memory().map_err(HubError::InMemoryStorage)?
        }
    };
    Ok(Arc::new(storage))
}

impl Application {
    pub async fn setup(config: &HubConfig, deps: ApplicationDeps) -> Result<Self, HubError> {
        let storage = match deps.storage {
            Some(storage) => storage,
            None => open_storage(config)?,
        };
        let access_tokens = deps
            .access_tokens
            .unwrap_or_else(|| Arc::new(Argon2AccessTokenManager::new()));
        let events = Arc::new(EventBus::new());
        let registry = Arc::new(SessionRegistry::new());

        let context = Arc::new(SessionContext::new(
            access_tokens,
            storage.clone(),
            events.clone(),
            registry.clone(),
        ));
        let sessions = Arc::new(SessionHub::new(context.clone(), registry.clone()));

        let discovery = deps
            .discovery
            .unwrap_or_else(|| Arc::new(ManifestDiscovery::new(config.plugin_roots())));
        let host = deps.plugin_host.unwrap_or_else(|| {
            Arc::new(BuiltinPluginHost::with_builtins(config.credentials_dir.clone()))
        });
        let plugins = Arc::new(PluginManager::new(
            storage.clone(),
            discovery,
            PluginInstaller::new(config.plugins_dir.clone()),
            host,
            sessions.clone(),
        ));
        let management: Arc<dyn PluginManagement> = plugins.clone();
        context.attach_plugins(Arc::downgrade(&management));

        if let Err(e) = plugins.load_plugins().await {
            warn!(error = %e, "Plugin reconciliation failed, continuing without plugins");
        }
        info!(
            db = ?config.db_path,
            plugins = plugins.loaded_plugins().await.len(),
            "Hub ready"
        );

        Ok(Self {
            storage,
            events,
            registry,
            sessions,
            plugins,
        })
    }

    /// Open a session. `callbacks` is the surface other apps reach through
    /// remote operations and event delivery.
    pub fn open_session(&self, callbacks: Option<Arc<dyn AppCallbacks>>) -> Arc<Session> {
        self.sessions.open(callbacks)
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionHub> {
        &self.sessions
    }

    pub fn plugins(&self) -> &Arc<PluginManager> {
        &self.plugins
    }

    /// Stop every loaded plugin, then destroy every remaining session.
    pub async fn shutdown(&self) {
        self.plugins.shutdown().await;
        let closed = self.sessions.destroy_all().await;
        info!(sessions = closed, "Hub shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use storehub_core::{
        AppSchema, EmitEventOptions, EventDelivery, EventFilter, ExecuteOperationOptions,
        ExecuteRemoteOperationOptions, HubEvent, IdentifyAppOptions, InstallPluginOptions,
        PluginStatus, ProtocolError, RegisterAppOptions, RemoteOperationRequest,
        RemoteOperationResponse, SubscribeToEventOptions, UnsubscribeFromEventOptions,
        UpdateSchemaOptions,
    };
    use storehub_plugins::{ECHO_ENTRY, MANIFEST_FILE_NAME};

    const TEST_PLUGIN: &str = "io.example.test-plugin";

    struct Dirs {
        _root: tempfile::TempDir,
        config: HubConfig,
    }

    fn dirs(file_db: bool) -> Dirs {
        let root = tempfile::tempdir().unwrap();
        let base = root.path();
        let config = HubConfig {
            db_path: file_db.then(|| base.join("hub.sqlite3")),
            plugins_dir: Some(base.join("plugins")),
            plugin_search_paths: vec![base.join("search")],
            credentials_dir: Some(base.join("credentials")),
            log_dir: base.join("logs"),
            log_level: "debug".into(),
            port: 50483,
        };
        Dirs {
            _root: root,
            config,
        }
    }

    fn write_plugin(root: &Path, identifier: &str) -> PathBuf {
        write_plugin_with_entry(root, identifier, ECHO_ENTRY)
    }

    fn write_plugin_with_entry(root: &Path, identifier: &str, main_entry: &str) -> PathBuf {
        let dir = root.join(identifier);
        std::fs::create_dir_all(&dir).unwrap();
        let manifest = json!({
            "identifier": identifier,
            "name": "Test plugin",
            "version": "0.1.0",
            "mainEntry": main_entry,
        });
        std::fs::write(dir.join(MANIFEST_FILE_NAME), manifest.to_string()).unwrap();
        dir
    }

    fn deps() -> ApplicationDeps {
        ApplicationDeps {
            access_tokens: Some(Arc::new(Argon2AccessTokenManager::with_token_length(12))),
            ..Default::default()
        }
    }

    fn register(name: &str) -> RegisterAppOptions {
        RegisterAppOptions {
            name: name.into(),
            remote: false,
            identify: true,
        }
    }

    #[derive(Default)]
    struct RecordingApp {
        events: Mutex<Vec<EventDelivery>>,
    }

    #[async_trait]
    impl AppCallbacks for RecordingApp {
        async fn handle_remote_operation(
            &self,
            request: RemoteOperationRequest,
        ) -> Result<RemoteOperationResponse> {
            Ok(RemoteOperationResponse {
                result: json!({"handledFor": request.source_app}),
            })
        }

        async fn handle_event(&self, delivery: EventDelivery) -> Result<()> {
            self.events.lock().unwrap().push(delivery);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_register_twice_keeps_first_token() {
        let dirs = dirs(false);
        let app = Application::setup(&dirs.config, deps()).await.unwrap();

        let first = app.open_session(None);
        let issued = first.register_app(register("memex")).await.unwrap();
        let hash = app.storage().get_app("memex").await.unwrap().unwrap().access_key_hash;

        let second = app.open_session(None);
        let err = second.register_app(register("memex")).await.unwrap_err();
        assert_eq!(err, ProtocolError::AppAlreadyExists);
        assert_eq!(
            app.storage().get_app("memex").await.unwrap().unwrap().access_key_hash,
            hash
        );

        // The original token still identifies.
        second
            .identify_app(IdentifyAppOptions {
                name: "memex".into(),
                access_token: issued.access_token,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_remote_operation_between_external_apps() {
        let dirs = dirs(false);
        let app = Application::setup(&dirs.config, deps()).await.unwrap();

        let caller = app.open_session(None);
        let anonymous = ExecuteRemoteOperationOptions {
            app: "backup".into(),
            operation: vec![json!("run")],
        };
        assert_eq!(
            caller.execute_remote_operation(anonymous.clone()).await.unwrap_err(),
            ProtocolError::NotIdentified
        );

        caller.register_app(register("memex")).await.unwrap();
        assert_eq!(
            caller.execute_remote_operation(anonymous.clone()).await.unwrap_err(),
            ProtocolError::AppNotFound
        );

        let target = app.open_session(Some(Arc::new(RecordingApp::default())));
        target.register_app(register("backup")).await.unwrap();
        let result = caller.execute_remote_operation(anonymous).await.unwrap();
        assert_eq!(result.result, json!({"handledFor": "memex"}));
    }

    #[tokio::test]
    async fn test_schema_and_storage_operations() {
        let dirs = dirs(false);
        let app = Application::setup(&dirs.config, deps()).await.unwrap();
        let session = app.open_session(None);
        session.register_app(register("memex")).await.unwrap();

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
        let count = session
            .execute_operation(ExecuteOperationOptions {
                operation: vec![json!("countObjects"), json!("memex:tags"), json!({})],
            })
            .await
            .unwrap();
        assert_eq!(count.result, json!(1));

        let mut foreign = AppSchema::default();
        foreign
            .collection_definitions
            .insert("other:tags".into(), json!({}));
        let err = session
            .update_schema(UpdateSchemaOptions { schema: foreign })
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::SchemaRejected { .. }));
    }

    #[tokio::test]
    async fn test_events_stop_after_unsubscribe_and_destroy() {
        let dirs = dirs(false);
        let app = Application::setup(&dirs.config, deps()).await.unwrap();

        let recorder = Arc::new(RecordingApp::default());
        let listener = app.open_session(Some(recorder.clone()));
        let emitter = app.open_session(None);
        emitter.register_app(register("memex")).await.unwrap();

        let subscription = listener
            .subscribe_to_event(SubscribeToEventOptions {
                request: EventFilter::event_type("note-added"),
            })
            .await
            .unwrap();
        let emit = || EmitEventOptions {
            event: HubEvent::new("note-added", json!({"id": 1})),
        };

        assert_eq!(emitter.emit_event(emit()).await.unwrap().delivered_count, 1);
        listener
            .unsubscribe_from_event(UnsubscribeFromEventOptions {
                subscription_id: subscription.subscription_id,
            })
            .await
            .unwrap();
        assert_eq!(emitter.emit_event(emit()).await.unwrap().delivered_count, 0);

        let delivered = recorder.events.lock().unwrap().clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].event.source_app.as_deref(), Some("memex"));

        listener
            .subscribe_to_event(SubscribeToEventOptions {
                request: EventFilter::event_type("*"),
            })
            .await
            .unwrap();
        listener.destroy_session().await;
        assert_eq!(emitter.emit_event(emit()).await.unwrap().delivered_count, 0);
        assert_eq!(app.events().subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_install_discovered_plugin_and_call_it() {
        let dirs = dirs(false);
        write_plugin(&dirs.config.plugin_search_paths[0], TEST_PLUGIN);
        let app = Application::setup(&dirs.config, deps()).await.unwrap();
        let session = app.open_session(None);

        let listed = session.list_plugins().await.unwrap();
        assert_eq!(listed.state[TEST_PLUGIN].status, PluginStatus::Available);

        session
            .install_plugin(InstallPluginOptions::Identifier {
                identifier: TEST_PLUGIN.into(),
            })
            .await
            .unwrap();
        let listed = session.list_plugins().await.unwrap();
        assert_eq!(listed.state[TEST_PLUGIN].status, PluginStatus::Enabled);
        assert!(app.plugins().loaded_plugins().await[TEST_PLUGIN].running);
        assert_eq!(app.registry().identified_apps().await, vec![TEST_PLUGIN.to_string()]);

        // The package was copied under the managed directory.
        let inspected = session.inspect_plugin(TEST_PLUGIN).await.unwrap();
        assert!(inspected.plugin_info.location.starts_with(dirs.config.plugins_dir.as_ref().unwrap()));

        session.register_app(register("memex")).await.unwrap();
        let result = session
            .execute_remote_operation(ExecuteRemoteOperationOptions {
                app: TEST_PLUGIN.into(),
                operation: vec![json!("ping")],
            })
            .await
            .unwrap();
        assert_eq!(result.result, json!({"sourceApp": "memex", "operation": ["ping"]}));
    }

    #[tokio::test]
    async fn test_session_sees_failed_plugin_install() {
        let dirs = dirs(false);
        let search = &dirs.config.plugin_search_paths[0];
        write_plugin_with_entry(search, TEST_PLUGIN, "builtin:missing");
        let app = Application::setup(&dirs.config, deps()).await.unwrap();
        let session = app.open_session(None);

        let err = session
            .install_plugin(InstallPluginOptions::Identifier {
                identifier: TEST_PLUGIN.into(),
            })
            .await
            .unwrap_err();
        match err {
            ProtocolError::PluginError { message } => {
                assert!(message.contains("installed-but-errored"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let status = app.storage().get_plugin(TEST_PLUGIN).await.unwrap().unwrap().status;
        assert_eq!(status, PluginStatus::InstalledButErrored);
        assert!(app.plugins().loaded_plugins().await.is_empty());
        assert!(app.registry().get(TEST_PLUGIN).await.is_none());
    }

    #[tokio::test]
    async fn test_plugin_survives_restart() {
        let dirs = dirs(true);
        let location = write_plugin(&dirs.config.plugin_search_paths[0], TEST_PLUGIN);

        let app = Application::setup(&dirs.config, deps()).await.unwrap();
        app.open_session(None)
            .install_plugin(InstallPluginOptions::Location { location })
            .await
            .unwrap();
        app.shutdown().await;
        drop(app);

        let app = Application::setup(&dirs.config, deps()).await.unwrap();
        assert!(app.plugins().loaded_plugins().await[TEST_PLUGIN].running);
        let status = app.storage().get_plugin(TEST_PLUGIN).await.unwrap().unwrap().status;
        assert_eq!(status, PluginStatus::Enabled);
        // The plugin re-identified with its stored credential.
        assert!(app.registry().get(TEST_PLUGIN).await.is_some());
    }

    #[tokio::test]
    async fn test_unopenable_database_is_fatal() {
        let mut dirs = dirs(false);
        let blocker = dirs.config.log_dir.with_file_name("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        dirs.config.db_path = Some(blocker.join("hub.sqlite3"));

        let err = Application::setup(&dirs.config, deps()).await.err().unwrap();
        assert!(matches!(err, HubError::Storage { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_destroys_sessions() {
        let dirs = dirs(false);
        let app = Application::setup(&dirs.config, deps()).await.unwrap();
        let session = app.open_session(None);
        session.register_app(register("memex")).await.unwrap();
        assert_eq!(app.sessions().live_sessions().len(), 1);

        app.shutdown().await;
        assert!(session.is_destroyed());
        assert!(app.sessions().live_sessions().is_empty());
        assert!(app.registry().get("memex").await.is_none());
        assert_eq!(
            session.get_session_info().app_identifier.as_deref(),
            Some("memex")
        );
    }
}
