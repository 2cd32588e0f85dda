use crate::error::{StackError, WifiError, WifiResult};
use crate::wifi::types::{InitConfig, Interface, StationConfig, StorageMode, WifiMode};
use secrecy::SecretString;
use tracing::{debug, info};

/// Control interface of the underlying network stack
pub trait NetworkStack: Send + Sync {
    fn init(&self, config: &InitConfig) -> Result<(), StackError>;

    fn set_storage(&self, storage: StorageMode) -> Result<(), StackError>;

    fn set_mode(&self, mode: WifiMode) -> Result<(), StackError>;

    fn set_config(&self, interface: Interface, config: &StationConfig) -> Result<(), StackError>;

    fn start(&self) -> Result<(), StackError>;

    fn stop(&self) -> Result<(), StackError>;

    /// Ask the driver to join the configured access point
    fn connect(&self) -> Result<(), StackError>;
}

/// Configure station mode and start the driver.
///
/// The join itself happens asynchronously once the driver reports it has
/// started.
pub fn connect(stack: &dyn NetworkStack, ssid: &str, password: &SecretString) -> WifiResult<()> {
    let config = StationConfig::new(ssid, password)?;

    stack
        .init(&InitConfig::default())
        .map_err(|e| WifiError::InitFailed { code: e.code() })?;
    stack
        .set_storage(StorageMode::Ram)
        .map_err(|e| WifiError::StorageFailed { code: e.code() })?;
    stack
        .set_mode(WifiMode::Station)
        .map_err(|e| WifiError::ModeFailed { code: e.code() })?;
    stack
        .set_config(Interface::Station, &config)
        .map_err(|e| WifiError::ConfigFailed { code: e.code() })?;
    debug!(ssid = config.ssid(), "station configured");

    stack
        .start()
        .map_err(|e| WifiError::StartFailed { code: e.code() })?;
    info!(ssid = config.ssid(), "station driver started");
    Ok(())
}

/// Stop the station driver
pub fn disconnect(stack: &dyn NetworkStack) -> WifiResult<()> {
    stack
        .stop()
        .map_err(|e| WifiError::StopFailed { code: e.code() })?;
    info!("station driver stopped");
    Ok(())
}
