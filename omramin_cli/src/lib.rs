#![allow(clippy::must_use_candidate)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]

pub mod device_prompt;
pub mod measurement_export;
pub mod omramin_cli_opts;
pub mod omramin_sync;
