use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use stack_string::{format_sstr, StackString};
use std::{fmt, str::FromStr};

use omramin_lib::errors::OmraminError as Error;

use crate::measurement::MeasurementKind;

static MACADDR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2}$").expect("Bad Regex")
});

#[must_use]
pub fn is_valid_macaddr(macaddr: &str) -> bool {
    MACADDR_REGEX.is_match(macaddr)
}

/// Derive the OMRON cloud serial number from a BLE MAC address,
/// e.g. 11:22:33:44:55:66 to 665544feff332211
#[must_use]
pub fn ble_mac_to_serial(macaddr: &str) -> StackString {
    let parts: SmallVec<[&str; 6]> = macaddr.split(':').collect();
    if parts.len() != 6 {
        return "".into();
    }
    format_sstr!(
        "{}{}{}feff{}{}{}",
        parts[5],
        parts[4],
        parts[3],
        parts[2],
        parts[1],
        parts[0]
    )
    .to_lowercase()
    .into()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceCategory {
    #[serde(rename = "SCALE")]
    Scale,
    #[serde(rename = "BPM")]
    Bpm,
}

impl DeviceCategory {
    /// Numeric device category code used by the OMRON measurement API.
    #[must_use]
    pub fn api_code(self) -> &'static str {
        match self {
            Self::Bpm => "0",
            Self::Scale => "1",
        }
    }

    #[must_use]
    pub fn kind(self) -> MeasurementKind {
        match self {
            Self::Scale => MeasurementKind::Weight,
            Self::Bpm => MeasurementKind::BloodPressure,
        }
    }
}

impl FromStr for DeviceCategory {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SCALE" => Ok(Self::Scale),
            "BPM" => Ok(Self::Bpm),
            _ => Err(Error::CustomError(format_sstr!(
                "Invalid device category: '{s}'"
            ))),
        }
    }
}

impl fmt::Display for DeviceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scale => f.write_str("SCALE"),
            Self::Bpm => f.write_str("BPM"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OmronDevice {
    pub macaddr: StackString,
    pub name: StackString,
    pub category: DeviceCategory,
    #[serde(default = "default_user")]
    pub user: u8,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_user() -> u8 {
    1
}

fn default_enabled() -> bool {
    true
}

impl OmronDevice {
    /// # Errors
    /// Returns error if the MAC address is malformed or the user slot is
    /// outside 1..=4
    pub fn new(
        macaddr: &str,
        name: Option<StackString>,
        category: DeviceCategory,
        user: u8,
        enabled: bool,
    ) -> Result<Self, Error> {
        if !is_valid_macaddr(macaddr) {
            return Err(Error::CustomError(format_sstr!(
                "Invalid MAC address: '{macaddr}'"
            )));
        }
        if !(1..=4).contains(&user) {
            return Err(Error::CustomError(format_sstr!(
                "Invalid device user slot: {user}"
            )));
        }
        let macaddr: StackString = macaddr.to_uppercase().into();
        let name = match name {
            Some(name) if !name.is_empty() => name,
            _ => ble_mac_to_serial(&macaddr),
        };
        Ok(Self {
            macaddr,
            name,
            category,
            user,
            enabled,
        })
    }

    /// The serial number of this device on the OMRON cloud, derived from the
    /// MAC address, never stored.
    #[must_use]
    pub fn serial(&self) -> StackString {
        ble_mac_to_serial(&self.macaddr)
    }

    /// Selectors match the friendly name first, then the MAC address.
    #[must_use]
    pub fn matches(&self, selector: &str) -> bool {
        self.name == selector || self.macaddr.eq_ignore_ascii_case(selector)
    }
}

impl fmt::Display for OmronDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Name:        {}\nMAC Address: {}\nCategory:    {}\nUser:        {}\nEnabled:     {}",
            self.name, self.macaddr, self.category, self.user, self.enabled,
        )
    }
}
