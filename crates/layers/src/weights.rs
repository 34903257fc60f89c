//! Named parameter storage shared by every layer constructor.
//!
//! A [`WeightMap`] maps dotted parameter names (`encoder.layers.0.ff_norm.weight`)
//! to tensors. Layers ask for parameters through a [`WeightScope`], passing the
//! shape implied by their configuration and the initialisation policy used when
//! the map is in [`LoadMode::Initialize`]. In [`LoadMode::Strict`] the map only
//! serves what it holds: absent names and mismatched shapes are errors, and
//! [`WeightMap::finish`] rejects entries nobody consumed.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Display;
use std::path::Path;

use candle_core::{DType, Device, Tensor};

use crate::LayerError;

/// How a [`WeightMap`] treats parameters it does not hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Every requested parameter must already be present.
    Strict,
    /// Missing parameters are sampled from their [`Init`] policy and recorded.
    Initialize,
}

/// Initialisation policies for freshly sampled parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Init {
    Zeros,
    Ones,
    /// Xavier/Glorot uniform over `(fan_out, fan_in)` matrices.
    XavierUniform,
    /// Zero-mean normal with the given standard deviation.
    Normal { std: f64 },
}

impl Init {
    fn sample(&self, shape: &[usize], device: &Device) -> candle_core::Result<Tensor> {
        match self {
            Init::Zeros => Tensor::zeros(shape, DType::F32, device),
            Init::Ones => Tensor::ones(shape, DType::F32, device),
            Init::XavierUniform => {
                let (fan_out, fan_in) = match shape {
                    [out, input] => (*out as f64, *input as f64),
                    [n] => (*n as f64, *n as f64),
                    other => {
                        let last = other.last().copied().unwrap_or(1) as f64;
                        (last, last)
                    }
                };
                let bound = (6.0f64 / (fan_in + fan_out).max(1.0)).sqrt() as f32;
                Tensor::rand(-bound, bound, shape, device)
            }
            Init::Normal { std } => Tensor::randn(0f32, *std as f32, shape, device),
        }
    }
}

/// Named mapping from parameter identifier to tensor.
#[derive(Debug, Clone)]
pub struct WeightMap {
    tensors: HashMap<String, Tensor>,
    consumed: BTreeSet<String>,
    mode: LoadMode,
    device: Device,
}

impl WeightMap {
    /// An empty map that samples every parameter on first request.
    pub fn initialize(device: &Device) -> Self {
        Self {
            tensors: HashMap::new(),
            consumed: BTreeSet::new(),
            mode: LoadMode::Initialize,
            device: device.clone(),
        }
    }

    /// A strict map over externally supplied tensors, cast to `f32` on `device`.
    pub fn from_tensors(
        tensors: HashMap<String, Tensor>,
        device: &Device,
    ) -> Result<Self, LayerError> {
        let mut converted = HashMap::with_capacity(tensors.len());
        for (name, tensor) in tensors {
            let tensor = tensor.to_dtype(DType::F32)?.to_device(device)?;
            converted.insert(name, tensor);
        }
        Ok(Self {
            tensors: converted,
            consumed: BTreeSet::new(),
            mode: LoadMode::Strict,
            device: device.clone(),
        })
    }

    /// Reads a strict map from a safetensors checkpoint.
    pub fn load_safetensors(path: impl AsRef<Path>, device: &Device) -> Result<Self, LayerError> {
        let path = path.as_ref();
        let tensors = candle_core::safetensors::load(path, device)?;
        log::info!(
            "loaded {} parameter tensors from {}",
            tensors.len(),
            path.display()
        );
        Self::from_tensors(tensors, device)
    }

    /// Writes every tensor currently held to a safetensors file.
    pub fn save_safetensors(&self, path: impl AsRef<Path>) -> Result<(), LayerError> {
        if self.tensors.is_empty() {
            return Err(LayerError::config("refusing to save an empty weight map"));
        }
        candle_core::safetensors::save(&self.tensors, path.as_ref())?;
        Ok(())
    }

    pub fn mode(&self) -> LoadMode {
        self.mode
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Sorted parameter names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tensors.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    /// Inserts or replaces a parameter before layers are built.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.tensors.insert(name.into(), tensor);
    }

    /// Returns the parameter `name` after checking it against `shape`.
    pub fn fetch(&mut self, name: &str, shape: &[usize], init: &Init) -> Result<Tensor, LayerError> {
        let tensor = match self.tensors.get(name) {
            Some(tensor) => {
                if tensor.dims() != shape {
                    return Err(LayerError::ShapeMismatch {
                        name: name.to_string(),
                        expected: shape.to_vec(),
                        actual: tensor.dims().to_vec(),
                    });
                }
                tensor.clone()
            }
            None => match self.mode {
                LoadMode::Strict => return Err(LayerError::MissingParameter(name.to_string())),
                LoadMode::Initialize => {
                    let tensor = init.sample(shape, &self.device)?;
                    self.tensors.insert(name.to_string(), tensor.clone());
                    tensor
                }
            },
        };
        self.consumed.insert(name.to_string());
        Ok(tensor)
    }

    /// Fails if any held parameter was never fetched.
    pub fn finish(&self) -> Result<(), LayerError> {
        let mut unused: Vec<String> = self
            .tensors
            .keys()
            .filter(|name| !self.consumed.contains(*name))
            .cloned()
            .collect();
        if unused.is_empty() {
            return Ok(());
        }
        unused.sort();
        Err(LayerError::UnusedParameters(unused))
    }

    /// Opens a scope rooted at `prefix`.
    pub fn scope(&mut self, prefix: impl Display) -> WeightScope<'_> {
        WeightScope {
            map: self,
            prefix: prefix.to_string(),
        }
    }

    /// Opens a scope with no prefix.
    pub fn root(&mut self) -> WeightScope<'_> {
        WeightScope {
            map: self,
            prefix: String::new(),
        }
    }
}

/// Prefixed view over a [`WeightMap`], mirroring the module hierarchy.
#[derive(Debug)]
pub struct WeightScope<'a> {
    map: &'a mut WeightMap,
    prefix: String,
}

impl WeightScope<'_> {
    /// Descends into a child module.
    pub fn pp(&mut self, name: impl Display) -> WeightScope<'_> {
        let prefix = self.path(name);
        WeightScope {
            map: &mut *self.map,
            prefix,
        }
    }

    /// Full dotted name of `name` inside this scope.
    pub fn path(&self, name: impl Display) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }

    pub fn fetch(&mut self, name: &str, shape: &[usize], init: &Init) -> Result<Tensor, LayerError> {
        let full = self.path(name);
        self.map.fetch(&full, shape, init)
    }

    pub fn device(&self) -> &Device {
        self.map.device()
    }
}
