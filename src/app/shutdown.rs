use super::ScanApp;
use crate::error::Result;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

const STOP_TIMEOUT: Duration = Duration::from_secs(10);

impl ScanApp {
    /// Stop scanning, then input and rendering
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");
        self.cancellation_token.cancel();

        let mut exit_code = 0;

        if let Some(keyboard) = &self.keyboard_handler {
            if let Err(e) = keyboard.stop().await {
                error!("Error stopping keyboard: {}", e);
                exit_code = 1;
            }
        }

        // Releases the camera and turns the torch off
        if timeout(STOP_TIMEOUT, self.coordinator.shutdown())
            .await
            .is_err()
        {
            error!("Scan source stop timeout");
            exit_code = 1;
        }

        if let Some(renderer) = self.renderer.as_mut() {
            renderer.stop().await;
        }

        let counts = self.coordinator.counts();
        info!(
            "Session {}: {} tagged, {} matched",
            self.session.id, counts.total, counts.matched
        );

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }
}
