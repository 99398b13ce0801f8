use super::{ScanApp, ShutdownReason};
use crate::error::{BagtagError, Result};
use crate::events::{BagtagEvent, EventFilter, EventReceiver};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::sync::{oneshot, Mutex};
use tracing::{error, info};

/// Far-off instant standing in for "no deadline" inside `select!`
fn dismiss_sleep(deadline: Option<Instant>) -> tokio::time::Sleep {
    let at = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
    tokio::time::sleep_until(tokio::time::Instant::from_std(at))
}

impl ScanApp {
    /// Start input and rendering, then the requested mode
    pub async fn start(&mut self) -> Result<()> {
        info!(
            "Starting scanning for flight {} ({})",
            self.session.flight, self.session.date
        );

        if let Some(renderer) = self.renderer.as_mut() {
            renderer.start();
        }
        if let Some(keyboard) = &self.keyboard_handler {
            keyboard.start().await?;
        }

        if let Some(input) = self.options.input {
            self.coordinator.set_input(input).await;
        }
        if let Some(mode) = self.options.mode {
            self.coordinator.start(mode).await;
        }
        Ok(())
    }

    /// Run the scan loop until a shutdown is requested
    pub async fn run(&mut self) -> Result<i32> {
        info!("Bagtag scanner is running");

        let shutdown_sender = self
            .shutdown_sender
            .take()
            .ok_or_else(|| BagtagError::system("Shutdown sender already taken"))?;
        let mut shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| BagtagError::system("Shutdown receiver already taken"))?;
        let mut source_rx = self
            .source_rx
            .take()
            .ok_or_else(|| BagtagError::system("Source channel already taken"))?;
        let mut command_rx = self
            .command_rx
            .take()
            .ok_or_else(|| BagtagError::system("Command channel already taken"))?;

        self.setup_signal_handlers(shutdown_sender).await;

        let mut shutdown_events = EventReceiver::new(
            self.event_bus.subscribe(),
            EventFilter::EventTypes(vec!["shutdown_requested"]),
            "runtime".to_string(),
        );
        let token = self.cancellation_token.clone();

        let reason = loop {
            let deadline = self.coordinator.dismiss_deadline();
            tokio::select! {
                reason = &mut shutdown_receiver => {
                    break reason.unwrap_or_else(|_| {
                        ShutdownReason::Error("Shutdown channel closed unexpectedly".to_string())
                    });
                }
                _ = token.cancelled() => break ShutdownReason::UserRequest,
                event = shutdown_events.recv() => {
                    if let Ok(BagtagEvent::ShutdownRequested { reason, .. }) = event {
                        info!("Shutdown requested: {}", reason);
                        break ShutdownReason::UserRequest;
                    }
                }
                message = source_rx.recv() => match message {
                    Some(message) => self.coordinator.handle_source_message(message).await,
                    None => break ShutdownReason::Error("Source channel closed".to_string()),
                },
                command = command_rx.recv() => match command {
                    Some(command) => self.coordinator.apply(command).await,
                    None => break ShutdownReason::UserRequest,
                },
                _ = dismiss_sleep(deadline), if deadline.is_some() => {
                    self.coordinator.poll_dismiss(Instant::now());
                }
            }
        };

        info!("Shutdown initiated: {:?}", reason);
        let mut exit_code = self.shutdown().await?;
        if let ShutdownReason::Error(e) = &reason {
            error!("Scanner stopped on error: {}", e);
            exit_code = 1;
        }

        info!("Bagtag scanner shutdown complete");
        Ok(exit_code)
    }

    /// Request a shutdown from outside the run loop
    pub fn request_shutdown(&self) {
        self.cancellation_token.cancel();
    }

    async fn setup_signal_handlers(&self, shutdown_sender: oneshot::Sender<ShutdownReason>) {
        let shutdown_sender = Arc::new(Mutex::new(Some(shutdown_sender)));

        // SIGTERM (systemd stop) - Unix only
        #[cfg(unix)]
        {
            let shutdown_sender_sigterm = Arc::clone(&shutdown_sender);
            tokio::spawn(async move {
                let mut sigterm =
                    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                        Ok(sigterm) => sigterm,
                        Err(e) => {
                            error!("Failed to register SIGTERM handler: {}", e);
                            return;
                        }
                    };
                if sigterm.recv().await.is_some() {
                    info!("Received SIGTERM signal");
                    if let Some(sender) = shutdown_sender_sigterm.lock().await.take() {
                        let _ = sender.send(ShutdownReason::Signal("SIGTERM".to_string()));
                    }
                }
            });
        }

        // SIGINT only arrives when the terminal is not in raw mode
        let shutdown_sender_sigint = Arc::clone(&shutdown_sender);
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                if let Some(sender) = shutdown_sender_sigint.lock().await.take() {
                    let _ = sender.send(ShutdownReason::Signal("SIGINT".to_string()));
                }
            }
        });
    }
}
