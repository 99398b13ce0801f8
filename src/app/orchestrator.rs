use super::startup::DataStores;
use super::types::{RunOptions, ShutdownReason};
use crate::acquisition::SourceMessage;
use crate::camera::CameraProvider;
use crate::config::BagtagConfig;
use crate::console::ConsoleRenderer;
use crate::coordinator::{ScanCommand, ScanCoordinator};
use crate::error::Result;
use crate::events::EventBus;
use crate::keyboard_input::KeyboardInputHandler;
use crate::store::SessionInfo;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

const COMMAND_QUEUE: usize = 64;

/// Interactive scanning session: coordinator, terminal input and renderer
pub struct ScanApp {
    pub(super) session: SessionInfo,
    pub(super) options: RunOptions,
    pub(super) event_bus: Arc<EventBus>,
    pub(super) coordinator: ScanCoordinator,

    pub(super) source_rx: Option<mpsc::Receiver<SourceMessage>>,
    pub(super) command_tx: mpsc::Sender<ScanCommand>,
    pub(super) command_rx: Option<mpsc::Receiver<ScanCommand>>,

    pub(super) keyboard_handler: Option<KeyboardInputHandler>,
    pub(super) renderer: Option<ConsoleRenderer>,

    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl ScanApp {
    /// Create an app for the current session with the configured camera backend
    pub fn new(
        config: &BagtagConfig,
        stores: &DataStores,
        session: SessionInfo,
        options: RunOptions,
    ) -> Result<Self> {
        let cameras = crate::camera::provider_from_config(&config.camera);
        Self::with_cameras(config, stores, session, options, cameras)
    }

    pub fn with_cameras(
        config: &BagtagConfig,
        stores: &DataStores,
        session: SessionInfo,
        options: RunOptions,
        cameras: Arc<dyn CameraProvider>,
    ) -> Result<Self> {
        let event_bus = Arc::new(EventBus::new(config.system.event_bus_capacity));
        let (coordinator, source_rx) = stores.coordinator_with(
            &session,
            config,
            Arc::clone(&event_bus) as Arc<dyn crate::coordinator::ScanFeedback>,
            cameras,
        )?;
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        let (keyboard_handler, renderer) = if options.interactive {
            (
                Some(KeyboardInputHandler::new(
                    command_tx.clone(),
                    Arc::clone(&event_bus),
                    config.wedge.idle(),
                )),
                Some(ConsoleRenderer::new(Arc::clone(&event_bus))),
            )
        } else {
            (None, None)
        };

        Ok(Self {
            session,
            options,
            event_bus,
            coordinator,
            source_rx: Some(source_rx),
            command_tx,
            command_rx: Some(command_rx),
            keyboard_handler,
            renderer,
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        })
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    /// Sender for operator commands, for callers other than the keyboard
    pub fn commands(&self) -> mpsc::Sender<ScanCommand> {
        self.command_tx.clone()
    }

    pub fn coordinator(&self) -> &ScanCoordinator {
        &self.coordinator
    }

    pub fn session(&self) -> &SessionInfo {
        &self.session
    }
}
