//! Dedicated threads for device streams that cannot cross threads

use std::thread::JoinHandle;

use tokio::sync::oneshot;
use tracing::error;

use crate::error::DeviceError;

/// Owns a stream thread and its stop signal
///
/// The stream value is built, kept and dropped on the thread itself.
#[derive(Default)]
pub struct DeviceThread {
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DeviceThread {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `build` on a dedicated thread and keep its value alive until stopped
    pub async fn spawn<F, S>(&mut self, name: &str, build: F) -> Result<(), DeviceError>
    where
        F: FnOnce() -> Result<S, DeviceError> + Send + 'static,
        S: 'static,
    {
        self.stop();

        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || match build() {
                Ok(stream) => {
                    // Receiver gone means acquisition was cancelled
                    if ready_tx.send(Ok(())).is_err() {
                        return;
                    }
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| DeviceError::Other(e.to_string()))?;

        self.stop_tx = Some(stop_tx);
        self.handle = Some(handle);

        match ready_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.stop();
                Err(e)
            }
            Err(_) => {
                self.stop();
                Err(DeviceError::Other("audio thread exited".to_string()))
            }
        }
    }

    /// Signal the thread to drop its stream; never blocks the caller
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let join = move || {
                if handle.join().is_err() {
                    error!("Audio stream thread panicked");
                }
            };
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn_blocking(join);
                }
                // Outside a runtime there is no worker to stall
                Err(_) => join(),
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }
}

impl Drop for DeviceThread {
    fn drop(&mut self) {
        self.stop();
    }
}
