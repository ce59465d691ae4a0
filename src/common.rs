pub use anyhow::{bail, ensure, format_err, Error, Result as Fallible};
pub use argh::FromArgs;
pub use itertools::Itertools;
pub use log::{debug, error, info, warn};
pub use serde::{
    de::Error as DeserializeError, ser::Error as SerializeError, Deserialize, Deserializer,
    Serialize, Serializer,
};
pub use std::{
    borrow::Borrow,
    collections::HashMap,
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
};
pub use tch::{
    nn::{self, VarStore},
    Device, Kind, Tensor,
};
pub use tch_tensor_like::TensorLike;
