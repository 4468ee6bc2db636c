use stack_string::StackString;
use std::{
    env::var,
    ops::Deref,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::errors::OmraminError as Error;

/// `OmraminConfig` holds configuration information which can be set either
/// through environment variables or the config.env file, see the dotenvy crate
/// for more information about the config file format.
#[derive(Default, Debug)]
pub struct OmraminConfigInner {
    pub home_dir: StackString,
    pub device_config_file: PathBuf,
    pub omron_tokenfile: PathBuf,
    pub garmin_connect_tokenfile: PathBuf,
    pub omron_server: StackString,
    pub omron_email: StackString,
    pub omron_password: StackString,
    pub omron_country: StackString,
    pub garmin_connect_email: StackString,
    pub garmin_connect_password: StackString,
    pub garmin_connect_is_cn: bool,
    pub garmin_connect_oauth_consumer_key: Option<StackString>,
    pub garmin_connect_oauth_consumer_secret: Option<StackString>,
    pub sync_days: usize,
}

#[derive(Default, Debug, Clone)]
pub struct OmraminConfig(Arc<OmraminConfigInner>);

macro_rules! set_config_parse {
    ($s:ident, $id:ident) => {
        if let Some($id) = var(&stringify!($id).to_uppercase())
            .ok()
            .and_then(|x| x.parse().ok())
        {
            $s.$id = $id;
        }
    };
}

macro_rules! set_config_from_env {
    ($s:ident, $id:ident) => {
        if let Ok($id) = var(&stringify!($id).to_uppercase()) {
            $s.$id = $id.into()
        }
    };
}

macro_rules! set_config_opt {
    ($s:ident, $id:ident) => {
        if let Ok($id) = var(&stringify!($id).to_uppercase()) {
            $s.$id = Some($id.into())
        }
    };
}

impl OmraminConfigInner {
    /// Some variables have natural default values, which we set in the new()
    /// method.
    pub fn new() -> Self {
        let home_dir = dirs::home_dir().unwrap_or_else(|| Path::new("/tmp").to_path_buf());
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| home_dir.join(".config"))
            .join("omramin");

        Self {
            home_dir: home_dir.to_string_lossy().to_string().into(),
            device_config_file: config_dir.join("devices.json"),
            omron_tokenfile: config_dir.join(".omron_tokens"),
            garmin_connect_tokenfile: config_dir.join(".garmin_tokens"),
            omron_server: "https://data-sg.omronconnect.com".into(),
            sync_days: 1,
            ..Self::default()
        }
    }

    /// Each variable maps to an environment variable, if the variable exists,
    /// use it.
    pub fn from_env(mut self) -> Self {
        set_config_from_env!(self, home_dir);
        set_config_parse!(self, device_config_file);
        set_config_parse!(self, omron_tokenfile);
        set_config_parse!(self, garmin_connect_tokenfile);
        set_config_from_env!(self, omron_server);
        set_config_from_env!(self, omron_email);
        set_config_from_env!(self, omron_password);
        set_config_from_env!(self, omron_country);
        set_config_from_env!(self, garmin_connect_email);
        set_config_from_env!(self, garmin_connect_password);
        set_config_parse!(self, garmin_connect_is_cn);
        set_config_opt!(self, garmin_connect_oauth_consumer_key);
        set_config_opt!(self, garmin_connect_oauth_consumer_secret);
        set_config_parse!(self, sync_days);
        self
    }
}

impl OmraminConfig {
    pub fn new() -> Self {
        Self(Arc::new(OmraminConfigInner::new()))
    }

    /// Pull configuration from a file if it exists,
    /// first look for a config.env file in the current directory,
    /// then try `${HOME}/.config/omramin/config.env`,
    /// if that doesn't exist fall back on the default behaviour of dotenvy.
    /// # Errors
    /// Returns error if there is no config directory
    pub fn get_config(fname: Option<&str>) -> Result<Self, Error> {
        let config_dir = dirs::config_dir()
            .ok_or(Error::StaticCustomError("No CONFIG directory"))?;
        let default_fname = config_dir.join("omramin").join("config.env");

        let env_file = match fname.map(Path::new) {
            Some(fname) if fname.exists() => fname,
            _ => &default_fname,
        };

        dotenvy::dotenv().ok();

        if env_file.exists() {
            dotenvy::from_path(env_file).ok();
        } else if Path::new("config.env").exists() {
            dotenvy::from_filename("config.env").ok();
        }

        let conf = OmraminConfigInner::new().from_env();

        Ok(Self(Arc::new(conf)))
    }
}

impl Deref for OmraminConfig {
    type Target = OmraminConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
