use crate::common::*;

const KERNEL_SUFFIX: &str = "kernel";
const BIAS_SUFFIX: &str = "bias";

/// Memory layout of the kernels stored in a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelLayout {
    /// Channels-last exporters: conv [kh, kw, in, out], dense [in, out].
    Hwio,
    /// Native layout: conv [out, in, kh, kw], dense [out, in].
    Oihw,
}

impl Default for KernelLayout {
    fn default() -> Self {
        KernelLayout::Hwio
    }
}

impl KernelLayout {
    fn to_native(&self, kernel: Tensor) -> Fallible<Tensor> {
        let kernel = match (self, kernel.dim()) {
            (KernelLayout::Oihw, 2) | (KernelLayout::Oihw, 4) => kernel,
            (KernelLayout::Hwio, 4) => kernel.permute(&[3, 2, 0, 1]),
            (KernelLayout::Hwio, 2) => kernel.transpose(0, 1),
            (_, dim) => bail!("kernels must be 2-D or 4-D, got {}-D", dim),
        };
        Ok(kernel.to_kind(Kind::Float).contiguous())
    }
}

/// Pretrained values of one layer, kernels in native layout.
#[derive(Debug)]
pub struct LayerWeights {
    pub kernel: Tensor,
    pub bias: Tensor,
}

/// Layer name to (kernel, bias) mapping loaded from a checkpoint file.
#[derive(Debug, Default)]
pub struct PretrainedWeights {
    layers: HashMap<String, LayerWeights>,
}

impl PretrainedWeights {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads a `.npz` or `.ot` archive whose entries are named `<layer>/kernel` and `<layer>/bias`.
    pub fn open<P>(path: P, layout: KernelLayout) -> Fallible<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let named_tensors = read_named_tensors(path)?;
        let weights = Self::from_named_tensors(named_tensors, layout)?;
        info!(
            "loaded {} pretrained layers from {}",
            weights.len(),
            path.display()
        );
        Ok(weights)
    }

    pub fn from_named_tensors<I>(named_tensors: I, layout: KernelLayout) -> Fallible<Self>
    where
        I: IntoIterator<Item = (String, Tensor)>,
    {
        let mut kernels = HashMap::new();
        let mut biases = HashMap::new();

        for (name, tensor) in named_tensors {
            match name.rsplit_once('/') {
                Some((layer, KERNEL_SUFFIX)) => {
                    kernels.insert(layer.to_owned(), tensor);
                }
                Some((layer, BIAS_SUFFIX)) => {
                    biases.insert(layer.to_owned(), tensor);
                }
                _ => debug!("skip checkpoint entry {}", name),
            }
        }

        let layers = kernels
            .into_iter()
            .map(|(layer, kernel)| {
                let bias = biases
                    .remove(&layer)
                    .ok_or_else(|| format_err!("layer {} has a kernel but no bias", layer))?;
                ensure!(
                    bias.dim() == 1,
                    "bias of layer {} must be 1-D, got shape {:?}",
                    layer,
                    bias.size()
                );
                let kernel = layout
                    .to_native(kernel)
                    .map_err(|err| format_err!("layer {}: {}", layer, err))?;
                let bias = bias.to_kind(Kind::Float);
                Ok((layer, LayerWeights { kernel, bias }))
            })
            .collect::<Fallible<HashMap<_, _>>>()?;

        if let Some(layer) = biases.keys().next() {
            bail!("layer {} has a bias but no kernel", layer);
        }

        Ok(Self { layers })
    }

    pub fn get(&self, layer: &str) -> Option<&LayerWeights> {
        self.layers.get(layer)
    }

    pub fn contains(&self, layer: &str) -> bool {
        self.layers.contains_key(layer)
    }

    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.layers.keys().map(String::as_str).sorted()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Reads all tensors of a `.npz` (numpy) or `.ot` (libtorch) archive.
pub fn read_named_tensors<P>(path: P) -> Fallible<Vec<(String, Tensor)>>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let named_tensors = match path.extension().and_then(|ext| ext.to_str()) {
        Some("npz") => Tensor::read_npz(path)?,
        Some("ot") => Tensor::load_multi(path)?,
        _ => bail!(
            "unsupported tensor archive {}, expect a .npz or .ot file",
            path.display()
        ),
    };
    Ok(named_tensors)
}
