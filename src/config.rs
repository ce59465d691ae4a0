use crate::{checkpoint::KernelLayout, common::*, model::params};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    pub checkpoint: Option<CheckpointConfig>,
    #[serde(
        serialize_with = "serialize_device",
        deserialize_with = "deserialize_device",
        default = "default_device"
    )]
    pub device: Device,
    /// Trainable parameters saved by a previous run.
    pub model_file: Option<PathBuf>,
    #[serde(default)]
    pub save_model: bool,
    pub report_file: Option<PathBuf>,
}

impl Config {
    pub fn open<P>(path: P) -> Fallible<Self>
    where
        P: AsRef<Path>,
    {
        let text = fs::read_to_string(path)?;
        let config = json5::from_str(&text)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_frame_size")]
    pub frame_size: i64,
    #[serde(default = "default_num_classes")]
    pub num_classes: i64,
    #[serde(default = "default_rcn_kernel_size")]
    pub rcn_kernel_size: i64,
    #[serde(default = "default_rcn_hidden_kernel_size")]
    pub rcn_hidden_kernel_size: i64,
    #[serde(default = "default_dropout")]
    pub dropout: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            frame_size: default_frame_size(),
            num_classes: default_num_classes(),
            rcn_kernel_size: default_rcn_kernel_size(),
            rcn_hidden_kernel_size: default_rcn_hidden_kernel_size(),
            dropout: default_dropout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub kernel_layout: KernelLayout,
}

fn default_frame_size() -> i64 {
    params::FRAME_SIZE
}

fn default_num_classes() -> i64 {
    params::NUM_CLASSES
}

fn default_rcn_kernel_size() -> i64 {
    params::RCN_KERNEL_SIZE
}

fn default_rcn_hidden_kernel_size() -> i64 {
    params::RCN_HIDDEN_KERNEL_SIZE
}

fn default_dropout() -> f64 {
    params::DROPOUT
}

fn default_device() -> Device {
    Device::cuda_if_available()
}

fn serialize_device<S>(device: &Device, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let text = match device {
        Device::Cpu => "cpu".into(),
        Device::Cuda(n) => format!("cuda({})", n),
    };
    text.serialize(serializer)
}

fn deserialize_device<'de, D>(deserializer: D) -> Result<Device, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    let device = match name.as_str() {
        "cpu" => Device::Cpu,
        _ => {
            let prefix = "cuda(";
            let suffix = ")";
            if name.starts_with(prefix) && name.ends_with(suffix) {
                let number: usize = name[(prefix.len())..(name.len() - suffix.len())]
                    .parse()
                    .map_err(|_err| D::Error::custom(format!("invalid device name {}", name)))?;
                Device::Cuda(number)
            } else {
                return Err(D::Error::custom(format!("invalid device name {}", name)));
            }
        }
    };
    Ok(device)
}
