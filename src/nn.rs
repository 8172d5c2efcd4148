use crate::checkpoint::{StateMap, Tensor};
use crate::error::LoadError;
use crate::inference::INPUT_SIZE;
use ndarray::{Array1, Array2, Array3, Array4, Axis};
use std::collections::HashSet;
use std::str::FromStr;

/// Closed set of architectures a checkpoint can be bound onto. Selectors are
/// resolved by name, never by dynamic symbol lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchitectureId {
    Linear,
    Mlp,
    SmallCnn,
}

impl ArchitectureId {
    pub const KNOWN: [&'static str; 3] = ["linear", "mlp", "small_cnn"];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArchitectureId::Linear => "linear",
            ArchitectureId::Mlp => "mlp",
            ArchitectureId::SmallCnn => "small_cnn",
        }
    }

    /// Instantiates the named architecture and binds the state map onto it.
    /// Binding either consumes every tensor or fails; in best-effort mode
    /// (`strict` off) leftovers are logged and ignored instead.
    pub(crate) fn build(
        self,
        params: &StateMap,
        num_classes: usize,
        strict: bool,
    ) -> Result<Architecture, LoadError> {
        let mut binder = ParamBinder::new(params);
        let architecture = match self {
            ArchitectureId::Linear => Architecture::Linear(Linear::bind(&mut binder, num_classes)?),
            ArchitectureId::Mlp => Architecture::Mlp(Mlp::bind(&mut binder, num_classes)?),
            ArchitectureId::SmallCnn => {
                Architecture::SmallCnn(SmallCnn::bind(&mut binder, num_classes)?)
            }
        };
        binder.finish(strict)?;

        Ok(architecture)
    }
}

impl FromStr for ArchitectureId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(ArchitectureId::Linear),
            "mlp" => Ok(ArchitectureId::Mlp),
            "small_cnn" => Ok(ArchitectureId::SmallCnn),
            other => Err(format!(
                "unknown architecture `{}`; known architectures: {}",
                other,
                ArchitectureId::KNOWN.join(", ")
            )),
        }
    }
}

/// A bound, ready-to-evaluate model graph.
#[derive(Debug)]
pub enum Architecture {
    Linear(Linear),
    Mlp(Mlp),
    SmallCnn(SmallCnn),
}

impl Architecture {
    /// Single forward pass: `(1, 3, H, W)` input to `(1, num_classes)` logits.
    pub(crate) fn forward(&self, input: &Array4<f32>) -> Result<Array2<f32>, String> {
        match self {
            Architecture::Linear(linear) => linear.forward(input),
            Architecture::Mlp(mlp) => mlp.forward(input),
            Architecture::SmallCnn(cnn) => cnn.forward(input),
        }
    }
}

#[derive(Debug)]
pub struct Linear {
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl Linear {
    pub(crate) const IN_FEATURES: usize = 3 * INPUT_SIZE * INPUT_SIZE;

    pub(crate) fn new(weight: Array2<f32>, bias: Array1<f32>) -> Self {
        Self { weight, bias }
    }

    fn bind(binder: &mut ParamBinder<'_>, num_classes: usize) -> Result<Self, LoadError> {
        let weight = binder.take2("fc.weight", Some(num_classes), Some(Self::IN_FEATURES))?;
        let bias = binder.take1("fc.bias", Some(num_classes))?;

        Ok(Self::new(weight, bias))
    }

    fn forward(&self, input: &Array4<f32>) -> Result<Array2<f32>, String> {
        let flat = flatten(input);
        if flat.len() != self.weight.ncols() {
            return Err(format!(
                "flattened input has {} features but the bound weight expects {}",
                flat.len(),
                self.weight.ncols()
            ));
        }
        let logits = self.weight.dot(&flat) + &self.bias;

        Ok(logits.insert_axis(Axis(0)))
    }
}

#[derive(Debug)]
pub struct Mlp {
    fc1_weight: Array2<f32>,
    fc1_bias: Array1<f32>,
    fc2_weight: Array2<f32>,
    fc2_bias: Array1<f32>,
}

impl Mlp {
    fn bind(binder: &mut ParamBinder<'_>, num_classes: usize) -> Result<Self, LoadError> {
        // hidden width comes from the checkpoint itself
        let fc1_weight = binder.take2("fc1.weight", None, Some(Linear::IN_FEATURES))?;
        let hidden = fc1_weight.nrows();
        let fc1_bias = binder.take1("fc1.bias", Some(hidden))?;
        let fc2_weight = binder.take2("fc2.weight", Some(num_classes), Some(hidden))?;
        let fc2_bias = binder.take1("fc2.bias", Some(num_classes))?;

        Ok(Self {
            fc1_weight,
            fc1_bias,
            fc2_weight,
            fc2_bias,
        })
    }

    fn forward(&self, input: &Array4<f32>) -> Result<Array2<f32>, String> {
        let flat = flatten(input);
        if flat.len() != self.fc1_weight.ncols() {
            return Err(format!(
                "flattened input has {} features but the bound weight expects {}",
                flat.len(),
                self.fc1_weight.ncols()
            ));
        }
        let mut hidden = self.fc1_weight.dot(&flat) + &self.fc1_bias;
        hidden.mapv_inplace(|v| v.max(0.));
        let logits = self.fc2_weight.dot(&hidden) + &self.fc2_bias;

        Ok(logits.insert_axis(Axis(0)))
    }
}

/// Two 3x3 conv blocks with max pooling, global average pooling and a final
/// fully connected layer.
#[derive(Debug)]
pub struct SmallCnn {
    conv1_weight: Array4<f32>,
    conv1_bias: Array1<f32>,
    conv2_weight: Array4<f32>,
    conv2_bias: Array1<f32>,
    fc_weight: Array2<f32>,
    fc_bias: Array1<f32>,
}

impl SmallCnn {
    const CONV1_CHANNELS: usize = 16;
    const CONV2_CHANNELS: usize = 32;

    fn bind(binder: &mut ParamBinder<'_>, num_classes: usize) -> Result<Self, LoadError> {
        let conv1_weight = binder.take4(
            "conv1.weight",
            [Some(Self::CONV1_CHANNELS), Some(3), Some(3), Some(3)],
        )?;
        let conv1_bias = binder.take1("conv1.bias", Some(Self::CONV1_CHANNELS))?;
        let conv2_weight = binder.take4(
            "conv2.weight",
            [
                Some(Self::CONV2_CHANNELS),
                Some(Self::CONV1_CHANNELS),
                Some(3),
                Some(3),
            ],
        )?;
        let conv2_bias = binder.take1("conv2.bias", Some(Self::CONV2_CHANNELS))?;
        let fc_weight = binder.take2("fc.weight", Some(num_classes), Some(Self::CONV2_CHANNELS))?;
        let fc_bias = binder.take1("fc.bias", Some(num_classes))?;

        Ok(Self {
            conv1_weight,
            conv1_bias,
            conv2_weight,
            conv2_bias,
            fc_weight,
            fc_bias,
        })
    }

    fn forward(&self, input: &Array4<f32>) -> Result<Array2<f32>, String> {
        let x = input.index_axis(Axis(0), 0).to_owned();
        if x.dim().0 != self.conv1_weight.dim().1 {
            return Err(format!(
                "input has {} channels but conv1 expects {}",
                x.dim().0,
                self.conv1_weight.dim().1
            ));
        }

        let mut x = conv2d(&x, &self.conv1_weight, &self.conv1_bias, 1);
        x.mapv_inplace(|v| v.max(0.));
        let x = max_pool2(&x);

        let mut x = conv2d(&x, &self.conv2_weight, &self.conv2_bias, 1);
        x.mapv_inplace(|v| v.max(0.));
        let x = max_pool2(&x);

        let (channels, height, width) = x.dim();
        if height == 0 || width == 0 {
            return Err("input too small for two pooling stages".into());
        }
        let mut pooled = Array1::zeros(channels);
        for c in 0..channels {
            pooled[c] = x.index_axis(Axis(0), c).mean().unwrap_or(0.);
        }

        let logits = self.fc_weight.dot(&pooled) + &self.fc_bias;

        Ok(logits.insert_axis(Axis(0)))
    }
}

fn flatten(input: &Array4<f32>) -> Array1<f32> {
    input.iter().copied().collect()
}

fn conv2d(
    input: &Array3<f32>,
    weight: &Array4<f32>,
    bias: &Array1<f32>,
    padding: usize,
) -> Array3<f32> {
    let (in_channels, height, width) = input.dim();
    let (out_channels, _, kernel_h, kernel_w) = weight.dim();
    let out_h = height + 2 * padding + 1 - kernel_h;
    let out_w = width + 2 * padding + 1 - kernel_w;

    let mut output = Array3::zeros((out_channels, out_h, out_w));
    for oc in 0..out_channels {
        for oy in 0..out_h {
            for ox in 0..out_w {
                let mut acc = bias[oc];
                for ic in 0..in_channels {
                    for ky in 0..kernel_h {
                        let iy = oy as isize + ky as isize - padding as isize;
                        if iy < 0 || iy >= height as isize {
                            continue;
                        }
                        for kx in 0..kernel_w {
                            let ix = ox as isize + kx as isize - padding as isize;
                            if ix < 0 || ix >= width as isize {
                                continue;
                            }
                            acc += input[[ic, iy as usize, ix as usize]]
                                * weight[[oc, ic, ky, kx]];
                        }
                    }
                }
                output[[oc, oy, ox]] = acc;
            }
        }
    }

    output
}

fn max_pool2(input: &Array3<f32>) -> Array3<f32> {
    let (channels, height, width) = input.dim();
    let out_h = height / 2;
    let out_w = width / 2;

    let mut output = Array3::zeros((channels, out_h, out_w));
    for c in 0..channels {
        for oy in 0..out_h {
            for ox in 0..out_w {
                let window = [
                    input[[c, 2 * oy, 2 * ox]],
                    input[[c, 2 * oy, 2 * ox + 1]],
                    input[[c, 2 * oy + 1, 2 * ox]],
                    input[[c, 2 * oy + 1, 2 * ox + 1]],
                ];
                output[[c, oy, ox]] = window.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            }
        }
    }

    output
}

/// Pulls named tensors out of a state map, shape-checking each one and
/// tracking what was consumed so leftovers can be reported.
pub(crate) struct ParamBinder<'a> {
    params: &'a StateMap,
    consumed: HashSet<String>,
}

impl<'a> ParamBinder<'a> {
    pub(crate) fn new(params: &'a StateMap) -> Self {
        Self {
            params,
            consumed: HashSet::new(),
        }
    }

    fn resolve(&mut self, name: &str) -> Result<&'a Tensor, LoadError> {
        if let Some(tensor) = self.params.get(name) {
            self.consumed.insert(name.to_string());
            return Ok(tensor);
        }

        // tolerate the distributed-training wrapper prefix
        let wrapped = format!("module.{}", name);
        if let Some(tensor) = self.params.get(&wrapped) {
            tracing::debug!(parameter = name, "bound through `module.` prefix");
            self.consumed.insert(wrapped);
            return Ok(tensor);
        }

        Err(LoadError::DeserializeFailed(format!(
            "missing parameter `{}` in state map",
            name
        )))
    }

    fn take(&mut self, name: &str, expected: &[Option<usize>]) -> Result<&'a Tensor, LoadError> {
        let tensor = self.resolve(name)?;
        let matches = tensor.shape.len() == expected.len()
            && tensor
                .shape
                .iter()
                .zip(expected)
                .all(|(got, want)| want.map_or(true, |w| w == *got));
        if !matches {
            return Err(LoadError::DeserializeFailed(format!(
                "parameter `{}` has shape {:?}, expected [{}]",
                name,
                tensor.shape,
                expected
                    .iter()
                    .map(|d| d.map_or("*".to_string(), |v| v.to_string()))
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        Ok(tensor)
    }

    fn take1(&mut self, name: &str, len: Option<usize>) -> Result<Array1<f32>, LoadError> {
        let tensor = self.take(name, &[len])?;
        Ok(Array1::from_vec(tensor.data.clone()))
    }

    fn take2(
        &mut self,
        name: &str,
        rows: Option<usize>,
        cols: Option<usize>,
    ) -> Result<Array2<f32>, LoadError> {
        let tensor = self.take(name, &[rows, cols])?;
        Array2::from_shape_vec((tensor.shape[0], tensor.shape[1]), tensor.data.clone())
            .map_err(|e| LoadError::DeserializeFailed(format!("parameter `{}`: {}", name, e)))
    }

    fn take4(&mut self, name: &str, shape: [Option<usize>; 4]) -> Result<Array4<f32>, LoadError> {
        let tensor = self.take(name, &shape)?;
        Array4::from_shape_vec(
            (
                tensor.shape[0],
                tensor.shape[1],
                tensor.shape[2],
                tensor.shape[3],
            ),
            tensor.data.clone(),
        )
        .map_err(|e| LoadError::DeserializeFailed(format!("parameter `{}`: {}", name, e)))
    }

    /// A bound model must account for the whole state map: leftovers are
    /// rejected in strict mode and logged in best-effort mode, so a partially
    /// bound model is never returned silently.
    fn finish(self, strict: bool) -> Result<(), LoadError> {
        let leftover: Vec<&str> = self
            .params
            .names()
            .filter(|name| !self.consumed.contains(*name))
            .collect();
        if leftover.is_empty() {
            return Ok(());
        }

        if strict {
            return Err(LoadError::DeserializeFailed(format!(
                "unexpected parameters in state map: {}; set model.strict_binding to false to ignore them",
                leftover.join(", ")
            )));
        }

        tracing::warn!(
            ignored = leftover.len(),
            parameters = ?leftover,
            "best-effort binding ignored unexpected state map parameters"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};

    fn tensor(shape: &[usize], data: Vec<f32>) -> Tensor {
        Tensor {
            shape: shape.to_vec(),
            data,
        }
    }

    fn linear_state_map(prefix: &str) -> StateMap {
        let mut params = StateMap::empty();
        params.insert(
            format!("{}fc.weight", prefix),
            tensor(&[2, Linear::IN_FEATURES], vec![0.; 2 * Linear::IN_FEATURES]),
        );
        params.insert(format!("{}fc.bias", prefix), tensor(&[2], vec![1., 0.]));
        params
    }

    #[test]
    fn architecture_ids_parse_and_print() {
        for name in ArchitectureId::KNOWN {
            assert_eq!(name.parse::<ArchitectureId>().unwrap().as_str(), name);
        }
    }

    #[test]
    fn unknown_architecture_lists_known_ids() {
        let err = "resnet152".parse::<ArchitectureId>().unwrap_err();

        assert!(err.contains("resnet152"));
        assert!(err.contains("linear, mlp, small_cnn"));
    }

    #[test]
    fn linear_binds_and_computes_logits() {
        let params = linear_state_map("");
        let arch = ArchitectureId::Linear.build(&params, 2, true).unwrap();

        let input = Array::from_elem((1, 3, INPUT_SIZE, INPUT_SIZE), 0.5);
        let logits = arch.forward(&input).unwrap();

        assert_eq!(logits.shape(), &[1, 2]);
        assert_eq!(logits[[0, 0]], 1.);
        assert_eq!(logits[[0, 1]], 0.);
    }

    #[test]
    fn binding_tolerates_distributed_wrapper_prefix() {
        let params = linear_state_map("module.");

        assert!(ArchitectureId::Linear.build(&params, 2, true).is_ok());
    }

    #[test]
    fn missing_parameter_is_rejected() {
        let mut params = StateMap::empty();
        params.insert(
            "fc.weight".to_string(),
            tensor(&[2, Linear::IN_FEATURES], vec![0.; 2 * Linear::IN_FEATURES]),
        );

        let err = ArchitectureId::Linear.build(&params, 2, true).unwrap_err();

        assert!(matches!(err, LoadError::DeserializeFailed(ref m) if m.contains("fc.bias")));
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let mut params = linear_state_map("");
        params.insert("fc.bias".to_string(), tensor(&[3], vec![1., 0., 0.]));

        let err = ArchitectureId::Linear.build(&params, 2, true).unwrap_err();

        assert!(matches!(err, LoadError::DeserializeFailed(ref m) if m.contains("fc.bias")));
    }

    #[test]
    fn strict_binding_rejects_leftover_parameters() {
        let mut params = linear_state_map("");
        params.insert("aux.weight".to_string(), tensor(&[1], vec![0.]));

        let err = ArchitectureId::Linear.build(&params, 2, true).unwrap_err();

        assert!(matches!(err, LoadError::DeserializeFailed(ref m) if m.contains("aux.weight")));
    }

    #[test]
    fn best_effort_binding_ignores_leftover_parameters() {
        let mut params = linear_state_map("");
        params.insert("aux.weight".to_string(), tensor(&[1], vec![0.]));

        assert!(ArchitectureId::Linear.build(&params, 2, false).is_ok());
    }

    #[test]
    fn conv2d_matches_hand_computation() {
        let input = Array3::from_shape_vec((1, 2, 2), vec![1., 2., 3., 4.]).unwrap();
        let weight = Array4::from_shape_vec((1, 1, 1, 1), vec![2.]).unwrap();
        let bias = array![0.5_f32];

        let output = conv2d(&input, &weight, &bias, 0);

        assert_eq!(output.shape(), &[1, 2, 2]);
        assert_eq!(output[[0, 0, 0]], 2.5);
        assert_eq!(output[[0, 1, 1]], 8.5);
    }

    #[test]
    fn conv2d_padding_keeps_spatial_size() {
        let input = Array3::from_elem((1, 4, 4), 1.);
        let weight = Array4::from_elem((1, 1, 3, 3), 1.);
        let bias = array![0.0_f32];

        let output = conv2d(&input, &weight, &bias, 1);

        assert_eq!(output.shape(), &[1, 4, 4]);
        // corner sees a 2x2 window, center a full 3x3
        assert_eq!(output[[0, 0, 0]], 4.);
        assert_eq!(output[[0, 1, 1]], 9.);
    }

    #[test]
    fn max_pool2_halves_and_takes_maxima() {
        let input =
            Array3::from_shape_vec((1, 2, 4), vec![1., 5., 2., 0., 3., 4., 8., 7.]).unwrap();

        let output = max_pool2(&input);

        assert_eq!(output.shape(), &[1, 1, 2]);
        assert_eq!(output[[0, 0, 0]], 5.);
        assert_eq!(output[[0, 0, 1]], 8.);
    }

    #[test]
    fn mlp_hidden_width_comes_from_checkpoint() {
        let mut params = StateMap::empty();
        params.insert(
            "fc1.weight".to_string(),
            tensor(&[4, Linear::IN_FEATURES], vec![0.; 4 * Linear::IN_FEATURES]),
        );
        params.insert("fc1.bias".to_string(), tensor(&[4], vec![1.; 4]));
        params.insert("fc2.weight".to_string(), tensor(&[2, 4], vec![0.25; 8]));
        params.insert("fc2.bias".to_string(), tensor(&[2], vec![0., 0.]));

        let arch = ArchitectureId::Mlp.build(&params, 2, true).unwrap();
        let input = Array4::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
        let logits = arch.forward(&input).unwrap();

        // hidden activations are all relu(1.0), each class sums 4 * 0.25
        assert_eq!(logits[[0, 0]], 1.);
        assert_eq!(logits[[0, 1]], 1.);
    }
}
