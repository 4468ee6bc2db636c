use async_trait::async_trait;
use log::{error, info, warn};
use stack_string::{format_sstr, StackString};
use std::{collections::HashSet, fmt, sync::Arc};
use time::OffsetDateTime;

use garmin_connect_lib::garmin_connect_client::GarminConnectClient;
use omramin_lib::{
    auth_prompt::CredentialPrompt, errors::OmraminError as Error,
    iso_8601_datetime::convert_datetime_to_str,
};
use omramin_models::{
    device::OmronDevice,
    measurement::{IdentityKey, Measurement, MeasurementKind},
    sync_window::SyncWindow,
};
use omron_connect_lib::omron_connect_client::OmronConnectClient;

/// Where measurements come from.  An `AuthExpired` failure is given exactly
/// one `reauthenticate` before the device is marked failed.
#[async_trait]
pub trait MeasurementSource {
    async fn fetch_measurements(
        &mut self,
        device: &OmronDevice,
        window: &SyncWindow,
    ) -> Result<Vec<Measurement>, Error>;
    async fn reauthenticate(&mut self) -> Result<(), Error>;
}

/// Where measurements go.  `fetch_existing` is expected to serve repeated
/// calls for the same kind and window from a per-run cache.
#[async_trait]
pub trait MeasurementDestination {
    async fn fetch_existing(
        &mut self,
        kind: MeasurementKind,
        window: &SyncWindow,
    ) -> Result<HashSet<IdentityKey>, Error>;
    async fn upload(&mut self, measurement: &Measurement) -> Result<(), Error>;
    async fn reauthenticate(&mut self) -> Result<(), Error>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub device: StackString,
    pub added: usize,
    pub skipped: usize,
    pub failed: usize,
    pub synced: bool,
}

impl DeviceSummary {
    fn new(device: &OmronDevice) -> Self {
        Self {
            device: device.name.clone(),
            added: 0,
            skipped: 0,
            failed: 0,
            synced: true,
        }
    }
}

impl fmt::Display for DeviceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Device '{}': {} added, {} skipped, {} failed",
            self.device, self.added, self.skipped, self.failed
        )
    }
}

/// Per-device reconciliation: fetch the source entries for the window,
/// fetch the identity keys already on the destination, upload only what is
/// missing and report per-record outcomes.  Devices are processed strictly
/// one at a time so one device's failure never touches another's state.
pub struct OmraminSync<S: MeasurementSource, D: MeasurementDestination> {
    source: S,
    destination: D,
}

impl<S, D> OmraminSync<S, D>
where
    S: MeasurementSource,
    D: MeasurementDestination,
{
    pub fn new(source: S, destination: D) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// # Errors
    /// Returns error if the sync window cannot be computed; per-device
    /// failures are reported in the summaries instead
    pub async fn sync_devices(
        &mut self,
        devices: &[OmronDevice],
        days: usize,
        now: OffsetDateTime,
    ) -> Result<Vec<DeviceSummary>, Error> {
        let window = SyncWindow::from_days(days, now)?;
        let mut summaries = Vec::with_capacity(devices.len());
        for device in devices {
            if !device.enabled {
                info!("Device '{}' is disabled.", device.name);
                continue;
            }
            let summary = match self.sync_device(device, &window).await {
                Ok(summary) => summary,
                Err(e) => {
                    error!("Device '{}' failed to sync: {e}", device.name);
                    DeviceSummary {
                        synced: false,
                        ..DeviceSummary::new(device)
                    }
                }
            };
            if summary.synced {
                info!("Device '{}' successfully synced.", device.name);
            }
            summaries.push(summary);
        }
        Ok(summaries)
    }

    async fn sync_device(
        &mut self,
        device: &OmronDevice,
        window: &SyncWindow,
    ) -> Result<DeviceSummary, Error> {
        info!(
            "Start synchronizing device {} from {} to {}",
            device.name,
            convert_datetime_to_str(window.start),
            convert_datetime_to_str(window.end),
        );

        let measurements = self.fetch_source(device, window).await?;
        let mut summary = DeviceSummary::new(device);
        if measurements.is_empty() {
            info!("No new measurements");
            info!("{summary}");
            return Ok(summary);
        }
        info!(
            "Downloaded {} entries from 'OMRON connect' for '{}'",
            measurements.len(),
            device.name
        );

        let existing = self.fetch_existing(device.category.kind(), window).await?;

        for measurement in &measurements {
            let datetime_str = convert_datetime_to_str(measurement.timestamp());
            if existing.contains(&measurement.identity_key()) {
                info!("  - '{datetime_str}' {} already exists", measurement.kind());
                summary.skipped += 1;
                continue;
            }
            match self.upload(measurement).await {
                Ok(()) => {
                    info!("  + '{datetime_str}' adding {measurement}");
                    summary.added += 1;
                }
                Err(Error::UploadRejected(message)) => {
                    warn!("  ! '{datetime_str}' upload rejected: {message}");
                    summary.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        summary.synced = summary.failed == 0;
        info!("{summary}");
        Ok(summary)
    }

    async fn fetch_source(
        &mut self,
        device: &OmronDevice,
        window: &SyncWindow,
    ) -> Result<Vec<Measurement>, Error> {
        let result = self.source.fetch_measurements(device, window).await;
        match result {
            Err(Error::AuthExpired) => {
                self.source
                    .reauthenticate()
                    .await
                    .map_err(|e| Error::AuthFailed(format_sstr!("{e}")))?;
                let result = self.source.fetch_measurements(device, window).await;
                match result {
                    Err(Error::AuthExpired) => Err(Error::AuthFailed(
                        "session could not be renewed".into(),
                    )),
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn fetch_existing(
        &mut self,
        kind: MeasurementKind,
        window: &SyncWindow,
    ) -> Result<HashSet<IdentityKey>, Error> {
        let result = self.destination.fetch_existing(kind, window).await;
        match result {
            Err(Error::AuthExpired) => {
                self.destination
                    .reauthenticate()
                    .await
                    .map_err(|e| Error::AuthFailed(format_sstr!("{e}")))?;
                let result = self.destination.fetch_existing(kind, window).await;
                match result {
                    Err(Error::AuthExpired) => Err(Error::AuthFailed(
                        "session could not be renewed".into(),
                    )),
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn upload(&mut self, measurement: &Measurement) -> Result<(), Error> {
        let result = self.destination.upload(measurement).await;
        match result {
            Err(Error::AuthExpired) => {
                self.destination
                    .reauthenticate()
                    .await
                    .map_err(|e| Error::AuthFailed(format_sstr!("{e}")))?;
                let result = self.destination.upload(measurement).await;
                match result {
                    Err(Error::AuthExpired) => Err(Error::AuthFailed(
                        "session could not be renewed".into(),
                    )),
                    other => other,
                }
            }
            other => other,
        }
    }
}

/// `MeasurementSource` backed by the OMRON connect account.
pub struct OmronSource {
    pub client: OmronConnectClient,
    pub prompt: Arc<dyn CredentialPrompt>,
}

#[async_trait]
impl MeasurementSource for OmronSource {
    async fn fetch_measurements(
        &mut self,
        device: &OmronDevice,
        window: &SyncWindow,
    ) -> Result<Vec<Measurement>, Error> {
        self.client.get_measurements(device, window).await
    }

    async fn reauthenticate(&mut self) -> Result<(), Error> {
        self.client.login(self.prompt.as_ref()).await
    }
}

/// `MeasurementDestination` backed by the Garmin Connect account.
pub struct GarminDestination {
    pub client: GarminConnectClient,
    pub prompt: Arc<dyn CredentialPrompt>,
}

#[async_trait]
impl MeasurementDestination for GarminDestination {
    async fn fetch_existing(
        &mut self,
        kind: MeasurementKind,
        window: &SyncWindow,
    ) -> Result<HashSet<IdentityKey>, Error> {
        self.client.fetch_existing(kind, window).await
    }

    async fn upload(&mut self, measurement: &Measurement) -> Result<(), Error> {
        self.client.upload(measurement).await
    }

    async fn reauthenticate(&mut self) -> Result<(), Error> {
        self.client.reauthenticate(self.prompt.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::collections::{HashSet, VecDeque};
    use time::{macros::datetime, Duration, OffsetDateTime};

    use omramin_lib::errors::OmraminError as Error;
    use omramin_models::{
        device::{DeviceCategory, OmronDevice},
        measurement::{IdentityKey, Measurement, MeasurementKind, WeightMeasurement},
        sync_window::SyncWindow,
    };

    use crate::omramin_sync::{MeasurementDestination, MeasurementSource, OmraminSync};

    fn test_now() -> OffsetDateTime {
        datetime!(2024-01-15 13:21:07 UTC)
    }

    fn weight(minutes: i64) -> Measurement {
        Measurement::Weight(WeightMeasurement::new(
            test_now() - Duration::minutes(minutes),
            73.5,
        ))
    }

    fn scale(name: &str) -> OmronDevice {
        OmronDevice::new(
            "00:5F:BF:11:22:33",
            Some(name.into()),
            DeviceCategory::Scale,
            1,
            true,
        )
        .unwrap()
    }

    #[derive(Default)]
    struct FakeSource {
        responses: VecDeque<Result<Vec<Measurement>, Error>>,
        fetches: usize,
        logins: usize,
    }

    #[async_trait]
    impl MeasurementSource for FakeSource {
        async fn fetch_measurements(
            &mut self,
            _device: &OmronDevice,
            _window: &SyncWindow,
        ) -> Result<Vec<Measurement>, Error> {
            self.fetches += 1;
            self.responses.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn reauthenticate(&mut self) -> Result<(), Error> {
            self.logins += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeDestination {
        existing: HashSet<IdentityKey>,
        uploaded: Vec<Measurement>,
        reject: HashSet<IdentityKey>,
        fetches: usize,
        upload_calls: usize,
    }

    #[async_trait]
    impl MeasurementDestination for FakeDestination {
        async fn fetch_existing(
            &mut self,
            _kind: MeasurementKind,
            _window: &SyncWindow,
        ) -> Result<HashSet<IdentityKey>, Error> {
            self.fetches += 1;
            Ok(self.existing.clone())
        }

        async fn upload(&mut self, measurement: &Measurement) -> Result<(), Error> {
            self.upload_calls += 1;
            if self.reject.contains(&measurement.identity_key()) {
                return Err(Error::UploadRejected("Invalid measurement".into()));
            }
            self.uploaded.push(*measurement);
            Ok(())
        }

        async fn reauthenticate(&mut self) -> Result<(), Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_empty_window_is_a_successful_sync() -> Result<(), Error> {
        let mut engine = OmraminSync::new(FakeSource::default(), FakeDestination::default());
        let summaries = engine.sync_devices(&[scale("Scale")], 1, test_now()).await?;
        assert_eq!(summaries.len(), 1);
        let summary = &summaries[0];
        assert_eq!(
            (summary.added, summary.skipped, summary.failed),
            (0, 0, 0)
        );
        assert!(summary.synced);
        // nothing to reconcile, so the destination is never consulted
        assert_eq!(engine.destination.fetches, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_existing_entries_are_skipped() -> Result<(), Error> {
        let entries = vec![weight(10), weight(20)];
        let mut source = FakeSource::default();
        source.responses.push_back(Ok(entries.clone()));
        let mut destination = FakeDestination::default();
        destination.existing.insert(entries[1].identity_key());

        let mut engine = OmraminSync::new(source, destination);
        let summaries = engine.sync_devices(&[scale("Scale")], 1, test_now()).await?;
        let summary = &summaries[0];
        assert_eq!(
            (summary.added, summary.skipped, summary.failed),
            (1, 1, 0)
        );
        assert!(summary.synced);
        // the existing entry is never uploaded
        assert_eq!(engine.destination.upload_calls, 1);
        assert_eq!(
            engine.destination.uploaded[0].identity_key(),
            entries[0].identity_key()
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_second_run_adds_nothing() -> Result<(), Error> {
        let entries = vec![weight(10), weight(20)];
        let mut source = FakeSource::default();
        source.responses.push_back(Ok(entries.clone()));
        source.responses.push_back(Ok(entries.clone()));

        let mut engine = OmraminSync::new(source, FakeDestination::default());
        let summaries = engine.sync_devices(&[scale("Scale")], 1, test_now()).await?;
        assert_eq!(summaries[0].added, 2);

        // the first run's uploads are now present on the destination
        let uploaded: Vec<_> = engine
            .destination
            .uploaded
            .iter()
            .map(Measurement::identity_key)
            .collect();
        engine.destination.existing.extend(uploaded);

        let summaries = engine.sync_devices(&[scale("Scale")], 1, test_now()).await?;
        let summary = &summaries[0];
        assert_eq!(
            (summary.added, summary.skipped, summary.failed),
            (0, 2, 0)
        );
        assert!(summary.synced);
        assert_eq!(engine.destination.upload_calls, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_rejected_upload_does_not_abort_the_device() -> Result<(), Error> {
        let entries = vec![weight(10), weight(20), weight(30)];
        let mut source = FakeSource::default();
        source.responses.push_back(Ok(entries.clone()));
        let mut destination = FakeDestination::default();
        destination.reject.insert(entries[1].identity_key());

        let mut engine = OmraminSync::new(source, destination);
        let summaries = engine.sync_devices(&[scale("Scale")], 1, test_now()).await?;
        let summary = &summaries[0];
        assert_eq!(
            (summary.added, summary.skipped, summary.failed),
            (2, 0, 1)
        );
        assert!(!summary.synced);
        // entries before and after the rejected one are still processed
        assert_eq!(engine.destination.upload_calls, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_session_gets_a_single_relogin() -> Result<(), Error> {
        let mut source = FakeSource::default();
        source.responses.push_back(Err(Error::AuthExpired));
        source.responses.push_back(Ok(vec![weight(10)]));

        let mut engine = OmraminSync::new(source, FakeDestination::default());
        let summaries = engine.sync_devices(&[scale("Scale")], 1, test_now()).await?;
        let summary = &summaries[0];
        assert_eq!(summary.added, 1);
        assert!(summary.synced);
        assert_eq!(engine.source.logins, 1);
        assert_eq!(engine.source.fetches, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_persistently_expired_session_fails_the_device() -> Result<(), Error> {
        let mut source = FakeSource::default();
        source.responses.push_back(Err(Error::AuthExpired));
        source.responses.push_back(Err(Error::AuthExpired));

        let mut engine = OmraminSync::new(source, FakeDestination::default());
        let summaries = engine.sync_devices(&[scale("Scale")], 1, test_now()).await?;
        assert!(!summaries[0].synced);
        assert_eq!(engine.source.logins, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_device_does_not_block_the_next() -> Result<(), Error> {
        let mut source = FakeSource::default();
        source
            .responses
            .push_back(Err(Error::SourceUnavailable("503".into())));
        source.responses.push_back(Ok(vec![weight(10)]));

        let devices = [scale("Broken"), scale("Scale")];
        let mut engine = OmraminSync::new(source, FakeDestination::default());
        let summaries = engine.sync_devices(&devices, 1, test_now()).await?;
        assert_eq!(summaries.len(), 2);
        assert!(!summaries[0].synced);
        assert!(summaries[1].synced);
        assert_eq!(summaries[1].added, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_disabled_devices_are_not_processed() -> Result<(), Error> {
        let mut disabled = scale("Disabled");
        disabled.enabled = false;

        let mut engine = OmraminSync::new(FakeSource::default(), FakeDestination::default());
        let summaries = engine.sync_devices(&[disabled], 1, test_now()).await?;
        assert!(summaries.is_empty());
        assert_eq!(engine.source.fetches, 0);
        Ok(())
    }
}
