use clap::Parser;
use log::info;
use stack_string::{format_sstr, StackString};
use std::{fs::File, io::stdout, path::PathBuf, sync::Arc};
use time::OffsetDateTime;
use tokio::time::Duration;

use garmin_connect_lib::garmin_connect_client::GarminConnectClient;
use omramin_lib::{
    auth_prompt::CredentialPrompt, errors::OmraminError as Error,
    omramin_config::OmraminConfig,
};
use omramin_models::{
    device::{DeviceCategory, OmronDevice},
    device_registry::DeviceRegistry,
    sync_window::SyncWindow,
};
use omron_ble_lib::pairing_scanner::PairingScanner;
use omron_connect_lib::omron_connect_client::OmronConnectClient;

use crate::{
    device_prompt::{self, TerminalPrompt},
    measurement_export::{export_measurements, ExportFormat},
    omramin_sync::{GarminDestination, OmraminSync, OmronSource},
};

const SCAN_TIMEOUT_SECS: u64 = 60;

#[derive(Parser, Debug)]
#[command(
    name = "omramin",
    about = "Sync data from 'OMRON connect' to 'Garmin Connect'"
)]
pub enum OmraminCliOpts {
    /// Add new Omron device
    Add {
        /// MAC address, skips the pairing scan when given
        #[arg(long)]
        macaddr: Option<StackString>,
        #[arg(long)]
        name: Option<StackString>,
        /// SCALE or BPM
        #[arg(long)]
        category: Option<DeviceCategory>,
        /// User number on the device (1-4)
        #[arg(long)]
        user: Option<u8>,
    },
    /// Configure a device by name or MAC address
    Config {
        #[arg(short, long)]
        device: StackString,
    },
    /// Export measurements of a device as CSV or JSON
    Export {
        #[arg(short, long)]
        device: StackString,
        /// Number of days to export from today
        #[arg(long, default_value_t = 7)]
        days: usize,
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
        /// Output file, stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List all configured devices
    List,
    /// Remove a device by name or MAC address
    Remove {
        #[arg(short, long)]
        device: StackString,
    },
    /// Sync device(s) to Garmin Connect
    Sync {
        /// Name or MAC address of the device to sync
        #[arg(short, long, default_value = "ALL")]
        device: StackString,
        /// Number of days to sync from today
        #[arg(long)]
        days: Option<usize>,
    },
    /// Show version information
    Version,
}

impl OmraminCliOpts {
    /// # Errors
    /// Returns error on any command failure
    pub async fn process_args() -> Result<(), Error> {
        let opts = Self::parse();
        let config = OmraminConfig::get_config(None)?;
        let mut registry = DeviceRegistry::load(&config.device_config_file)?;

        match opts {
            Self::Add {
                macaddr,
                name,
                category,
                user,
            } => Self::add_device(&mut registry, macaddr, name, category, user).await,
            Self::Config { device } => {
                let existing = registry
                    .get(&device)
                    .ok_or_else(|| Error::DeviceNotFound(device.clone()))?;
                let patch = device_prompt::prompt_device_patch(existing)?;
                registry.update(&device, patch)?;
                info!("Device {device} configured successfully.");
                Ok(())
            }
            Self::Export {
                device,
                days,
                format,
                output,
            } => Self::export_device(&config, &registry, &device, days, format, output).await,
            Self::List => {
                let devices = registry.list();
                if devices.is_empty() {
                    info!("No devices configured.");
                    return Ok(());
                }
                for device in devices {
                    println!("{}", "-".repeat(40));
                    println!("{device}");
                }
                println!("{}", "-".repeat(40));
                Ok(())
            }
            Self::Remove { device } => {
                registry.remove(&device)?;
                info!("Device '{device}' removed successfully.");
                Ok(())
            }
            Self::Sync { device, days } => {
                let days = days.unwrap_or(config.sync_days).max(1);
                Self::sync_devices(&config, &registry, &device, days).await
            }
            Self::Version => {
                println!("omramin {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }

    async fn add_device(
        registry: &mut DeviceRegistry,
        macaddr: Option<StackString>,
        name: Option<StackString>,
        category: Option<DeviceCategory>,
        user: Option<u8>,
    ) -> Result<(), Error> {
        let macaddr = match macaddr {
            Some(macaddr) => macaddr,
            None => {
                let known = registry
                    .list()
                    .iter()
                    .map(|device| device.macaddr.clone())
                    .collect::<Vec<_>>();
                let scanner = PairingScanner::new(known).await?;
                let cancel = async {
                    tokio::signal::ctrl_c().await.ok();
                };
                let found = scanner
                    .scan(Duration::from_secs(SCAN_TIMEOUT_SECS), cancel, |_| {})
                    .await?;
                let choices: Vec<StackString> = found
                    .iter()
                    .map(|device| device.mac_address.clone())
                    .collect();
                device_prompt::select_from_list("Select device", &choices)?
            }
        };

        if registry.get(&macaddr).is_some() {
            return Err(Error::DuplicateDevice(macaddr));
        }

        let device = match category {
            Some(category) => {
                OmronDevice::new(&macaddr, name, category, user.unwrap_or(1), true)?
            }
            None => device_prompt::prompt_new_device(&macaddr, name)?,
        };
        registry.add(device)?;
        info!("Device(s) added successfully.");
        Ok(())
    }

    async fn export_device(
        config: &OmraminConfig,
        registry: &DeviceRegistry,
        selector: &str,
        days: usize,
        format: ExportFormat,
        output: Option<PathBuf>,
    ) -> Result<(), Error> {
        let device = registry
            .get(selector)
            .ok_or_else(|| Error::DeviceNotFound(selector.into()))?
            .clone();

        let prompt = TerminalPrompt;
        let mut omron = OmronConnectClient::new(config.clone());
        omron.init(&prompt).await?;

        let window = SyncWindow::from_days(days, OffsetDateTime::now_utc())?;
        let measurements = omron.get_measurements(&device, &window).await?;
        info!(
            "Downloaded {} entries from 'OMRON connect' for '{}'",
            measurements.len(),
            device.name
        );

        match output {
            Some(path) => export_measurements(&measurements, format, File::create(path)?),
            None => export_measurements(&measurements, format, stdout().lock()),
        }
    }

    async fn sync_devices(
        config: &OmraminConfig,
        registry: &DeviceRegistry,
        selector: &str,
        days: usize,
    ) -> Result<(), Error> {
        let devices: Vec<OmronDevice> = if selector == "ALL" {
            registry.list().into_iter().cloned().collect()
        } else {
            let device = registry
                .get(selector)
                .ok_or_else(|| Error::DeviceNotFound(selector.into()))?;
            if !device.enabled {
                info!("Device '{}' is disabled.", device.name);
                return Ok(());
            }
            vec![device.clone()]
        };

        let prompt: Arc<dyn CredentialPrompt> = Arc::new(TerminalPrompt);

        let mut omron = OmronConnectClient::new(config.clone());
        omron.init(prompt.as_ref()).await?;

        let mut garmin = GarminConnectClient::new(config.clone())?;
        garmin.init(prompt.as_ref()).await?;

        let source = OmronSource {
            client: omron,
            prompt: prompt.clone(),
        };
        let destination = GarminDestination {
            client: garmin,
            prompt,
        };
        let mut engine = OmraminSync::new(source, destination);
        let summaries = engine
            .sync_devices(&devices, days, OffsetDateTime::now_utc())
            .await?;

        let failed = summaries.iter().filter(|summary| !summary.synced).count();
        if failed > 0 {
            return Err(Error::CustomError(format_sstr!(
                "{failed} device(s) failed to sync"
            )));
        }
        Ok(())
    }
}
