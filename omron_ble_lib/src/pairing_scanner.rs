use btleplug::{
    api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter},
    platform::{Adapter, Manager, PeripheralId},
};
use futures::{Stream, StreamExt};
use log::{debug, info};
use stack_string::{format_sstr, StackString};
use std::{collections::HashSet, future::Future, pin::Pin};
use tokio::time::{sleep, Duration};

use omramin_lib::errors::OmraminError as Error;
use omramin_models::device::ble_mac_to_serial;

const OMRON_MAC_PREFIX: &str = "00:5F:BF";
const OMRON_NAME_PREFIXES: [&str; 2] = ["OMRON", "BLEsmart_"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub mac_address: StackString,
    pub name: Option<StackString>,
    pub signal_strength: Option<i16>,
}

/// Whether an advertisement looks like an OMRON device in pairing mode,
/// either by the manufacturer MAC prefix or by the advertised name.
#[must_use]
pub fn matches_omron_signature(mac_address: &str, name: Option<&str>) -> bool {
    if mac_address.starts_with(OMRON_MAC_PREFIX) {
        return true;
    }
    name.is_some_and(|name| {
        OMRON_NAME_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
    })
}

/// Listens for BLE advertisements on the first adapter and surfaces
/// previously unknown OMRON devices until the timeout passes or the
/// caller-supplied cancel future resolves.
pub struct PairingScanner {
    adapter: Adapter,
    known_macs: HashSet<StackString>,
}

impl PairingScanner {
    /// # Errors
    /// Returns error if no bluetooth adapter is available
    pub async fn new(known_macs: impl IntoIterator<Item = StackString>) -> Result<Self, Error> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::StaticCustomError("No bluetooth adapter found"))?;
        let known_macs = known_macs
            .into_iter()
            .map(|mac| mac.to_uppercase().into())
            .collect();
        Ok(Self {
            adapter,
            known_macs,
        })
    }

    /// Scan until the timeout passes or `cancel` resolves, reporting each
    /// new candidate through `on_discovered`.  The adapter scan is stopped
    /// on every exit path.
    /// # Errors
    /// Returns `PairingTimeout` or `PairingCancelled` when the scan ends
    /// with no devices found
    pub async fn scan<C, F>(
        &self,
        timeout: Duration,
        cancel: C,
        on_discovered: F,
    ) -> Result<Vec<DiscoveredDevice>, Error>
    where
        C: Future<Output = ()>,
        F: FnMut(&DiscoveredDevice),
    {
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;
        info!("Scanning for Omron devices in pairing mode ...");
        let result = self
            .scan_loop(&mut events, timeout, cancel, on_discovered)
            .await;
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("stop_scan failed: {e}");
        }
        result
    }

    async fn scan_loop<C, F>(
        &self,
        events: &mut Pin<Box<dyn Stream<Item = CentralEvent> + Send>>,
        timeout: Duration,
        cancel: C,
        mut on_discovered: F,
    ) -> Result<Vec<DiscoveredDevice>, Error>
    where
        C: Future<Output = ()>,
        F: FnMut(&DiscoveredDevice),
    {
        let mut found: Vec<DiscoveredDevice> = Vec::new();
        let mut seen: HashSet<StackString> = HashSet::new();
        let deadline = sleep(timeout);
        tokio::pin!(deadline);
        tokio::pin!(cancel);

        loop {
            tokio::select! {
                () = &mut deadline => {
                    return if found.is_empty() {
                        Err(Error::PairingTimeout)
                    } else {
                        Ok(found)
                    };
                }
                () = &mut cancel => {
                    return if found.is_empty() {
                        Err(Error::PairingCancelled)
                    } else {
                        Ok(found)
                    };
                }
                event = events.next() => {
                    let Some(event) = event else {
                        return Ok(found);
                    };
                    match event {
                        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                            if let Some(device) = self.inspect(&id, &mut seen).await? {
                                on_discovered(&device);
                                found.push(device);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    async fn inspect(
        &self,
        id: &PeripheralId,
        seen: &mut HashSet<StackString>,
    ) -> Result<Option<DiscoveredDevice>, Error> {
        let peripheral = self.adapter.peripheral(id).await?;
        let Some(properties) = peripheral.properties().await? else {
            return Ok(None);
        };
        let mac_address = format_sstr!("{}", properties.address);
        if seen.contains(&mac_address) || self.known_macs.contains(&mac_address) {
            return Ok(None);
        }
        let name: Option<StackString> = properties.local_name.map(Into::into);
        if !matches_omron_signature(&mac_address, name.as_ref().map(StackString::as_str)) {
            return Ok(None);
        }
        seen.insert(mac_address.clone());
        info!(
            "+ {mac_address} {} {} {}",
            name.as_ref().map_or("", StackString::as_str),
            ble_mac_to_serial(&mac_address),
            properties.rssi.unwrap_or_default(),
        );
        Ok(Some(DiscoveredDevice {
            mac_address,
            name,
            signal_strength: properties.rssi,
        }))
    }
}
