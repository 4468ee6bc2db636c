use async_trait::async_trait;
use log::info;
use stack_string::{format_sstr, StackString};
use std::io::{stdin, stderr, BufRead, Write};

use omramin_lib::{
    auth_prompt::{CredentialPrompt, Credentials},
    errors::OmraminError as Error,
};
use omramin_models::{
    device::{ble_mac_to_serial, DeviceCategory, OmronDevice},
    device_registry::DevicePatch,
};

fn prompt_line(message: &str) -> Result<StackString, Error> {
    let mut err = stderr();
    write!(err, "> {message}: ")?;
    err.flush()?;
    let mut line = String::new();
    stdin().lock().read_line(&mut line)?;
    Ok(line.trim().into())
}

fn prompt_default(message: &str, default: &str) -> Result<StackString, Error> {
    let answer = prompt_line(&format_sstr!("{message} [{default}]"))?;
    if answer.is_empty() {
        Ok(default.into())
    } else {
        Ok(answer)
    }
}

/// Interactive configuration of a newly selected device.
/// # Errors
/// Returns error if reading input fails or a field does not parse
pub fn prompt_new_device(
    macaddr: &str,
    name: Option<StackString>,
) -> Result<OmronDevice, Error> {
    let name = match name {
        Some(name) if !name.is_empty() => name,
        _ => prompt_default("Name of the device", &ble_mac_to_serial(macaddr))?,
    };
    let category: DeviceCategory = prompt_default("Type of the device (SCALE/BPM)", "SCALE")?
        .parse()?;
    let user: u8 = prompt_default("User number on the device (1-4)", "1")?.parse()?;
    let enabled: bool = prompt_default("Enable device (true/false)", "true")?.parse()?;
    OmronDevice::new(macaddr, Some(name), category, user, enabled)
}

/// Interactive update of an already configured device, current values as
/// defaults.
/// # Errors
/// Returns error if reading input fails or a field does not parse
pub fn prompt_device_patch(device: &OmronDevice) -> Result<DevicePatch, Error> {
    let name = prompt_default("Name of the device", &device.name)?;
    let category: DeviceCategory = prompt_default(
        "Type of the device (SCALE/BPM)",
        &device.category.to_string(),
    )?
    .parse()?;
    let user: u8 = prompt_default(
        "User number on the device (1-4)",
        &format_sstr!("{}", device.user),
    )?
    .parse()?;
    let enabled: bool = prompt_default(
        "Enable device (true/false)",
        &format_sstr!("{}", device.enabled),
    )?
    .parse()?;
    Ok(DevicePatch {
        name: Some(name),
        category: Some(category),
        user: Some(user),
        enabled: Some(enabled),
    })
}

/// # Errors
/// Returns error if there is nothing to select or the answer is not a valid
/// index
pub fn select_from_list(message: &str, choices: &[StackString]) -> Result<StackString, Error> {
    if choices.is_empty() {
        return Err(Error::StaticCustomError("Nothing to select from"));
    }
    if choices.len() == 1 {
        return Ok(choices[0].clone());
    }
    let mut err = stderr();
    writeln!(err, "{message}:")?;
    for (index, choice) in choices.iter().enumerate() {
        writeln!(err, "  {index}) {choice}")?;
    }
    err.flush()?;
    let index: usize = prompt_line("Enter number")?.parse()?;
    choices
        .get(index)
        .cloned()
        .ok_or(Error::StaticCustomError("Selection out of range"))
}

/// Terminal implementation of the credential contract the clients use.
#[derive(Default, Debug, Clone, Copy)]
pub struct TerminalPrompt;

#[async_trait]
impl CredentialPrompt for TerminalPrompt {
    async fn obtain_credentials(&self, service: &str) -> Result<Credentials, Error> {
        info!("{service} login");
        let username = prompt_line("Enter username or email")?;
        if username.is_empty() {
            return Err(Error::StaticCustomError("Empty username"));
        }
        let password = prompt_line("Enter password")?;
        if password.is_empty() {
            return Err(Error::StaticCustomError("Empty password"));
        }
        Ok(Credentials { username, password })
    }

    async fn obtain_mfa_code(&self, _service: &str) -> Result<StackString, Error> {
        prompt_line("Enter MFA/2FA code")
    }
}
