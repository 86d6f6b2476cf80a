//! Model loading, feature binding and evaluation.
//!
//! The flow mirrors a classic session API: a [`Model`] is loaded, a [`Session`]
//! ties it to a [`ComputeDevice`], a [`Binding`] holds one tensor per declared
//! feature, and [`Session::evaluate`] runs the plan once.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Instant;

use anyhow::{Context, Result, bail, ensure};
use tract_core::internal::DimLike;
use tract_onnx::prelude::*;
use tract_onnx::prelude::tract_ndarray::Array4;

use crate::device::ComputeDevice;
use crate::frame::ImageFrame;
use crate::report::ScoreVector;

/// Spatial size used when the model leaves height or width symbolic.
pub const DEFAULT_IMAGE_SIZE: usize = 224;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Normalization {
    /// 0..255, the convention of image-typed model features.
    #[default]
    Raw,
    /// 0..1
    Unit,
    /// 0..1, then per channel ImageNet mean and standard deviation.
    ImageNet,
}

impl Normalization {
    fn apply(&self, color: usize, value: u8) -> f32 {
        const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
        const STD: [f32; 3] = [0.229, 0.224, 0.225];
        match self {
            Normalization::Raw => value as f32,
            Normalization::Unit => value as f32 / 255.0,
            Normalization::ImageNet => (value as f32 / 255.0 - MEAN[color]) / STD[color],
        }
    }
}

impl FromStr for Normalization {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Normalization> {
        match s {
            "raw" => Ok(Normalization::Raw),
            "unit" => Ok(Normalization::Unit),
            "imagenet" => Ok(Normalization::ImageNet),
            _ => bail!("Unknown normalization {s:?} (expected raw, unit or imagenet)"),
        }
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Normalization::Raw => write!(f, "raw"),
            Normalization::Unit => write!(f, "unit"),
            Normalization::ImageNet => write!(f, "imagenet"),
        }
    }
}

/// How pixels become input tensor values.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Preprocessing {
    pub normalization: Normalization,
    /// Feed channels in blue, green, red order.
    pub bgr: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Layout {
    Nchw,
    Nhwc,
}

/// An image input, made concrete.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFeature {
    pub name: String,
    pub datum_type: DatumType,
    pub layout: Layout,
    pub height: usize,
    pub width: usize,
}

impl ImageFeature {
    pub fn shape(&self) -> TVec<usize> {
        match self.layout {
            Layout::Nchw => tvec!(1, 3, self.height, self.width),
            Layout::Nhwc => tvec!(1, self.height, self.width, 3),
        }
    }

    /// Converts the frame to the tensor this feature declares.
    pub fn tensor(&self, frame: &ImageFrame, pre: &Preprocessing) -> Result<Tensor> {
        let frame = frame.resized(self.width as u32, self.height as u32);
        let color = |c: usize| if pre.bgr { 2 - c } else { c };
        let pixel = |y: usize, x: usize, c: usize| {
            frame.pixels[(x as u32, y as u32)][color(c)]
        };
        let (h, w) = (self.height, self.width);
        let tensor: Tensor = match (self.datum_type, self.layout) {
            (DatumType::F32, Layout::Nchw) => {
                Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| {
                    pre.normalization.apply(color(c), pixel(y, x, c))
                })
                .into()
            }
            (DatumType::F32, Layout::Nhwc) => {
                Array4::from_shape_fn((1, h, w, 3), |(_, y, x, c)| {
                    pre.normalization.apply(color(c), pixel(y, x, c))
                })
                .into()
            }
            (DatumType::U8, Layout::Nchw) => {
                Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| pixel(y, x, c)).into()
            }
            (DatumType::U8, Layout::Nhwc) => {
                Array4::from_shape_fn((1, h, w, 3), |(_, y, x, c)| pixel(y, x, c)).into()
            }
            (dt, _) => bail!("Unsupported image input type {dt:?} for {}", self.name),
        };
        Ok(tensor)
    }
}

/// Works out the concrete image shape from a declared rank-4 shape.
///
/// `None` marks a symbolic dimension. The channel axis is the one of size 3.
pub fn image_layout(dims: &[Option<usize>]) -> Result<(Layout, usize, usize)> {
    ensure!(
        dims.len() == 4,
        "Expected a rank 4 image input, model declares rank {}",
        dims.len()
    );
    if let Some(batch) = dims[0] {
        ensure!(batch == 1, "Model expects a batch of {batch} images, only one is supported");
    }
    let spatial = |d: Option<usize>| d.unwrap_or(DEFAULT_IMAGE_SIZE);
    match (dims[1], dims[3]) {
        (Some(3), _) | (None, None) => {
            Ok((Layout::Nchw, spatial(dims[2]), spatial(dims[3])))
        }
        (_, Some(3)) | (_, None) => {
            Ok((Layout::Nhwc, spatial(dims[1]), spatial(dims[2])))
        }
        _ => bail!("No 3-channel axis in image input shape {dims:?}"),
    }
}

/// A model as loaded from disk, before being bound to a device.
#[derive(Debug, Clone)]
pub struct Model {
    model: InferenceModel,
}

impl Model {
    pub fn load(path: impl AsRef<Path>) -> Result<Model> {
        let path = path.as_ref();
        let start = Instant::now();
        let model = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("Loading model {}", path.display()))?;
        info!("model file loaded in {:?}", start.elapsed());
        Model::new(model)
    }

    pub fn new(model: InferenceModel) -> Result<Model> {
        let inputs = model.input_outlets()?.len();
        let outputs = model.output_outlets()?.len();
        ensure!(inputs == 1, "Model declares {inputs} input features, expected exactly one");
        ensure!(outputs == 1, "Model declares {outputs} output features, expected exactly one");
        Ok(Model { model })
    }

    /// Reads the declared input feature, filling in symbolic dimensions.
    pub fn image_feature(&self) -> Result<ImageFeature> {
        let typed = self.model.clone().into_typed().context("Typing model")?;
        let outlet = typed.input_outlets()?[0];
        let fact = typed.outlet_fact(outlet)?;
        let dims: Vec<Option<usize>> = fact.shape.iter().map(|d| d.to_usize().ok()).collect();
        let name = typed.node(outlet.node).name.clone();
        let (layout, height, width) =
            image_layout(&dims).with_context(|| format!("Binding image to input {name:?}"))?;
        Ok(ImageFeature {
            name,
            datum_type: fact.datum_type,
            layout,
            height,
            width,
        })
    }
}

/// Name and shape of a declared output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputFeature {
    pub name: String,
    pub datum_type: DatumType,
    pub shape: TVec<usize>,
}

/// A model prepared for one device, with all its features concrete.
#[derive(Debug)]
pub struct Session {
    model: TypedModel,
    device: ComputeDevice,
    input: ImageFeature,
    output: OutputFeature,
}

impl Session {
    pub fn new(model: Model, device: ComputeDevice) -> Result<Session> {
        let input = model.image_feature()?;
        let mut typed = model
            .model
            .with_input_fact(0, InferenceFact::dt_shape(input.datum_type, input.shape()))?
            .into_typed()?
            .into_decluttered()?;
        let accelerated = device.accelerate(&mut typed)?;
        let typed = typed.into_optimized()?;
        debug!("Session on {device} (device kernels: {accelerated})");

        let outlet = typed.output_outlets()?[0];
        let fact = typed.outlet_fact(outlet)?;
        let Some(shape) = fact.shape.as_concrete() else {
            bail!("Output shape {:?} is not fully determined by the input", fact.shape)
        };
        let output = OutputFeature {
            name: typed.node(outlet.node).name.clone(),
            datum_type: fact.datum_type,
            shape: shape.into(),
        };
        debug!("Input {input:?}, output {output:?}");
        Ok(Session { model: typed, device, input, output })
    }

    pub fn device(&self) -> &ComputeDevice {
        &self.device
    }

    pub fn input(&self) -> &ImageFeature {
        &self.input
    }

    pub fn output(&self) -> &OutputFeature {
        &self.output
    }

    /// Runs the plan once on the bound input.
    pub fn evaluate(self, binding: Binding) -> Result<Evaluation> {
        let Binding { input, output } = binding;
        let Some(input) = input else {
            bail!("Input {:?} is not bound", self.input.name)
        };
        let Some(bound) = output else {
            bail!("Output {:?} is not bound", self.output.name)
        };
        debug!("Evaluating on {}", self.device);
        let plan = self.model.into_runnable()?;
        let start = Instant::now();
        let mut outputs = plan.run(tvec!(input.into()))?;
        info!("model run took {:?}", start.elapsed());
        let result = outputs.remove(0).into_tensor();
        ensure!(
            result.shape() == bound.shape(),
            "Output {:?} came back as {:?}, bound as {:?}",
            self.output.name,
            result.shape(),
            bound.shape()
        );
        Ok(Evaluation { outputs: vec![(self.output.name, result)] })
    }
}

/// One tensor per feature for a single evaluation.
#[derive(Debug, Default)]
pub struct Binding {
    input: Option<Tensor>,
    output: Option<Tensor>,
}

impl Binding {
    pub fn new(_session: &Session) -> Binding {
        Binding::default()
    }

    pub fn bind_image(
        &mut self,
        session: &Session,
        frame: &ImageFrame,
        pre: &Preprocessing,
    ) -> Result<()> {
        self.input = Some(session.input.tensor(frame, pre)?);
        Ok(())
    }

    /// Allocates the output at the shape the model declares.
    pub fn bind_output(&mut self, session: &Session) -> Result<()> {
        let OutputFeature { datum_type, shape, .. } = &session.output;
        self.output = Some(Tensor::zero_dt(*datum_type, shape)?);
        Ok(())
    }
}

#[derive(Debug)]
pub struct Evaluation {
    outputs: Vec<(String, Tensor)>,
}

impl Evaluation {
    pub fn lookup(&self, name: &str) -> Option<&Tensor> {
        self.outputs.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }
}

/// Where models come from.
pub trait ModelLoader {
    fn load(&self, path: &Path) -> Result<Model>;
}

/// Reads ONNX protobuf files.
#[derive(Debug, Default, Copy, Clone)]
pub struct OnnxLoader;

impl ModelLoader for OnnxLoader {
    fn load(&self, path: &Path) -> Result<Model> {
        Model::load(path)
    }
}

/// Binds the frame and evaluates, returning one score per output class.
pub fn evaluate(
    model: Model,
    device: ComputeDevice,
    frame: &ImageFrame,
    pre: &Preprocessing,
) -> Result<ScoreVector> {
    let session = Session::new(model, device)?;
    debug!("Session ready on {}", session.device());
    let mut binding = Binding::new(&session);
    binding.bind_image(&session, frame, pre)?;
    binding.bind_output(&session)?;
    let output_name = session.output().name.clone();
    let evaluation = session.evaluate(binding)?;
    let Some(scores) = evaluation.lookup(&output_name) else {
        bail!("No output named {output_name:?} after evaluation")
    };
    ScoreVector::from_tensor(scores)
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use image::{Rgb, RgbImage};

    /// A model returning its input unchanged.
    pub(crate) fn identity(fact: InferenceFact) -> Model {
        let mut model = InferenceModel::default();
        let source = model.add_source("data", fact).unwrap();
        model.set_output_outlets(&[source]).unwrap();
        Model::new(model).unwrap()
    }

    fn frame() -> ImageFrame {
        let mut pixels = RgbImage::new(2, 2);
        pixels.put_pixel(0, 0, Rgb([1, 2, 3]));
        pixels.put_pixel(1, 0, Rgb([4, 5, 6]));
        pixels.put_pixel(0, 1, Rgb([7, 8, 9]));
        pixels.put_pixel(1, 1, Rgb([10, 11, 12]));
        pixels.into()
    }

    #[test]
    fn layouts() {
        let layout = |dims: &[Option<usize>]| image_layout(dims).unwrap();
        assert_eq!(layout(&[Some(1), Some(3), Some(224), Some(224)]), (Layout::Nchw, 224, 224));
        assert_eq!(layout(&[None, Some(299), Some(300), Some(3)]), (Layout::Nhwc, 299, 300));
        assert_eq!(layout(&[None, Some(3), None, None]), (Layout::Nchw, 224, 224));
        assert_eq!(layout(&[None, None, None, None]), (Layout::Nchw, 224, 224));
        assert!(image_layout(&[Some(4), Some(3), Some(8), Some(8)]).is_err());
        assert!(image_layout(&[Some(1), Some(1), Some(8), Some(8)]).is_err());
        assert!(image_layout(&[Some(1), Some(1000)]).is_err());
    }

    #[test]
    fn normalization_from_str() {
        assert_eq!("imagenet".parse::<Normalization>().unwrap(), Normalization::ImageNet);
        assert_eq!(Normalization::Unit.to_string(), "unit");
        assert!("zscore".parse::<Normalization>().is_err());
    }

    #[test]
    fn nchw_f32_round_trip() {
        let model = identity(f32::fact([1, 3, 2, 2]).into());
        let pre = Preprocessing::default();
        let scores = evaluate(model, ComputeDevice::Cpu, &frame(), &pre).unwrap();
        let expected: Vec<f32> = vec![1., 4., 7., 10., 2., 5., 8., 11., 3., 6., 9., 12.];
        assert_eq!(scores.scores(), &*expected);
    }

    #[test]
    fn nhwc_u8_bgr() {
        let model = identity(u8::fact([1, 2, 2, 3]).into());
        let pre = Preprocessing { bgr: true, ..Preprocessing::default() };
        let scores = evaluate(model, ComputeDevice::Cpu, &frame(), &pre).unwrap();
        let expected: Vec<f32> = vec![3., 2., 1., 6., 5., 4., 9., 8., 7., 12., 11., 10.];
        assert_eq!(scores.scores(), &*expected);
    }

    #[test]
    fn output_is_bound_at_declared_shape() {
        let model = identity(f32::fact([1, 3, 2, 2]).into());
        let session = Session::new(model, ComputeDevice::Cpu).unwrap();
        assert_eq!(session.device(), &ComputeDevice::Cpu);
        assert_eq!(session.output().shape, tvec!(1, 3, 2, 2));
        assert_eq!(session.output().name, "data");
        let mut binding = Binding::new(&session);
        binding.bind_output(&session).unwrap();
        assert!(session.evaluate(binding).is_err());
    }

    #[test]
    fn unit_normalization_resizes() {
        let model = identity(f32::fact([1, 3, 1, 1]).into());
        let white = ImageFrame::from(RgbImage::from_pixel(4, 4, Rgb([255, 255, 255])));
        let pre = Preprocessing { normalization: Normalization::Unit, bgr: false };
        let scores = evaluate(model, ComputeDevice::Cpu, &white, &pre).unwrap();
        assert_eq!(scores.scores(), &[1.0f32, 1.0, 1.0]);
    }

    struct IdentityLoader;

    impl ModelLoader for IdentityLoader {
        fn load(&self, path: &Path) -> Result<Model> {
            ensure!(path == Path::new("identity.onnx"), "No such model {}", path.display());
            Ok(identity(f32::fact([1, 3, 2, 2]).into()))
        }
    }

    #[test]
    fn evaluate_from_loader() {
        let model = IdentityLoader.load(Path::new("identity.onnx")).unwrap();
        let pre = Preprocessing::default();
        let scores = evaluate(model, ComputeDevice::Cpu, &frame(), &pre).unwrap();
        assert_eq!(scores.len(), 12);
        assert_eq!(&scores.scores()[..4], &[1.0, 4.0, 7.0, 10.0]);
        assert!(IdentityLoader.load(Path::new("x.onnx")).is_err());
    }

    #[test]
    fn missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("squeezenet.onnx");
        assert!(OnnxLoader.load(&path).is_err());
    }
}
