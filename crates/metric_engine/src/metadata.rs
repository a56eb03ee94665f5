use thiserror::Error;

/// TSC frequency in Hz
pub const SYSTEM_TSC_FREQ: &str = "SYSTEM_TSC_FREQ";
pub const CORES_PER_SOCKET: &str = "CORES_PER_SOCKET";
pub const SOCKET_COUNT: &str = "SOCKET_COUNT";
/// 1 when more than one hardware thread runs per core, 0 otherwise
pub const HYPERTHREADING_ON: &str = "HYPERTHREADING_ON";
/// Hardware threads per core
pub const CONST_THREAD_COUNT: &str = "CONST_THREAD_COUNT";

/// Names that metric formulas may use as host constants
pub const CONSTANTS: [&str; 5] = [
    SYSTEM_TSC_FREQ,
    CORES_PER_SOCKET,
    SOCKET_COUNT,
    HYPERTHREADING_ON,
    CONST_THREAD_COUNT,
];

/// Errors that can occur while reading host metadata
#[derive(Error, Debug, PartialEq)]
pub enum MetadataError {
    #[error("lscpu output has no {0:?} field")]
    MissingField(&'static str),

    #[error("invalid value {value:?} for lscpu field {field:?}")]
    InvalidField { field: &'static str, value: String },
}

/// Static facts about the host a stream was collected on
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub hostname: String,
    pub threads_per_core: u32,
    pub cores_per_socket: u32,
    pub socket_count: u32,
    pub tsc_frequency_hz: Option<u64>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            hostname: local_hostname(),
            threads_per_core: 1,
            cores_per_socket: 1,
            socket_count: 1,
            tsc_frequency_hz: None,
        }
    }
}

/// Hostname of the machine this process runs on
pub fn local_hostname() -> String {
    hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string())
}

impl Metadata {
    /// Reads topology from `lscpu` output.
    ///
    /// The TSC frequency is taken from the nominal frequency in the model name
    /// (`... CPU @ 2.30GHz`) when present.
    pub fn from_lscpu(text: &str) -> Result<Self, MetadataError> {
        let threads_per_core = parse_count(text, "Thread(s) per core")?;
        let cores_per_socket = parse_count(text, "Core(s) per socket")?;
        let socket_count = parse_count(text, "Socket(s)")?;
        let tsc_frequency_hz = lscpu_field(text, "Model name").and_then(nominal_frequency_hz);

        Ok(Self {
            threads_per_core,
            cores_per_socket,
            socket_count,
            tsc_frequency_hz,
            ..Self::default()
        })
    }

    pub fn hyperthreading_on(&self) -> bool {
        self.threads_per_core > 1
    }

    /// Value of a formula constant, `None` if unknown or unavailable
    pub fn constant(&self, name: &str) -> Option<f64> {
        match name {
            SYSTEM_TSC_FREQ => self.tsc_frequency_hz.map(|hz| hz as f64),
            CORES_PER_SOCKET => Some(f64::from(self.cores_per_socket)),
            SOCKET_COUNT => Some(f64::from(self.socket_count)),
            HYPERTHREADING_ON => Some(if self.hyperthreading_on() { 1.0 } else { 0.0 }),
            CONST_THREAD_COUNT => Some(f64::from(self.threads_per_core)),
            _ => None,
        }
    }
}

fn lscpu_field<'a>(text: &'a str, field: &str) -> Option<&'a str> {
    text.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (key.trim() == field).then(|| value.trim())
    })
}

fn parse_count(text: &str, field: &'static str) -> Result<u32, MetadataError> {
    let value = lscpu_field(text, field).ok_or(MetadataError::MissingField(field))?;
    match value.parse::<u32>() {
        Ok(count) if count > 0 => Ok(count),
        _ => Err(MetadataError::InvalidField {
            field,
            value: value.to_string(),
        }),
    }
}

fn nominal_frequency_hz(model_name: &str) -> Option<u64> {
    let (_, frequency) = model_name.rsplit_once('@')?;
    let ghz = frequency.trim().strip_suffix("GHz")?.trim().parse::<f64>().ok()?;
    Some((ghz * 1e9).round() as u64)
}
