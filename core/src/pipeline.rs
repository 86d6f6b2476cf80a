use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::Result;

use crate::adapter::{self, AdapterSource};
use crate::device::{self, ComputeDevice};
use crate::frame::ImageFrame;
use crate::inference::{self, ModelLoader, Preprocessing};
use crate::labels::LabelTable;
use crate::report::{self, DEFAULT_TOP_K};

/// Everything one run needs, resolved by the caller.
#[derive(Debug, Clone)]
pub struct Parameters {
    pub model: PathBuf,
    pub image: PathBuf,
    pub labels: PathBuf,
    pub top_k: usize,
    pub preprocessing: Preprocessing,
    /// Keep software and remote adapters in the list.
    pub include_software: bool,
    /// Skip adapter selection altogether.
    pub force_cpu: bool,
}

impl Parameters {
    pub fn new(
        model: impl Into<PathBuf>,
        image: impl Into<PathBuf>,
        labels: impl Into<PathBuf>,
    ) -> Parameters {
        Parameters {
            model: model.into(),
            image: image.into(),
            labels: labels.into(),
            top_k: DEFAULT_TOP_K,
            preprocessing: Preprocessing::default(),
            include_software: false,
            force_cpu: false,
        }
    }
}

/// Labels, device selection, inference, report.
///
/// Any error aborts before a single result line is written.
pub fn run(
    params: &Parameters,
    source: &dyn AdapterSource,
    models: &dyn ModelLoader,
    input: &mut dyn BufRead,
    output: &mut dyn Write,
) -> Result<()> {
    let labels = LabelTable::load(&params.labels)?;

    let device = if params.force_cpu {
        ComputeDevice::Cpu
    } else {
        let adapters = adapter::enumerate(source, !params.include_software);
        device::select(&adapters, input, output)?
    };
    info!("Running on {device}");

    writeln!(output, "Loading modelfile '{}' on the selected device", params.model.display())?;
    let model = models.load(&params.model)?;

    writeln!(output, "Loading the image...")?;
    let frame = ImageFrame::load(&params.image)?;

    writeln!(output, "Running the model...")?;
    let scores = inference::evaluate(model, device, &frame, &params.preprocessing)?;
    debug!("Got {} scores", scores.len());

    report::report(&scores, &labels, params.top_k, output)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::adapter::test::FixedSource;
    use crate::adapter::{AdapterInfo, AdapterKind};
    use crate::inference::test::identity;
    use crate::inference::{Model, OnnxLoader};
    use image::{Rgb, RgbImage};
    use std::io::Cursor;
    use std::path::Path;
    use tract_onnx::prelude::DatumExt;

    fn gpus() -> FixedSource {
        FixedSource(vec![
            AdapterInfo::new("GeForce RTX 3080", AdapterKind::Discrete),
            AdapterInfo::new("Intel UHD 630", AdapterKind::Integrated),
        ])
    }

    /// Serves a 1x3x1x1 identity network whatever the path.
    struct PassThrough;

    impl ModelLoader for PassThrough {
        fn load(&self, _path: &Path) -> Result<Model> {
            Ok(identity(f32::fact([1, 3, 1, 1]).into()))
        }
    }

    fn transcript(
        params: &Parameters,
        models: &dyn ModelLoader,
        typed: &str,
    ) -> (Result<()>, String) {
        let mut input = Cursor::new(typed.as_bytes().to_vec());
        let mut output = vec![];
        let result = run(params, &gpus(), models, &mut input, &mut output);
        (result, String::from_utf8(output).unwrap())
    }

    #[test]
    fn classifies_on_the_selected_adapter() {
        let dir = tempfile::tempdir().unwrap();
        let labels = dir.path().join("labels.txt");
        std::fs::write(&labels, "0,cat\n1,dog\n2,fish\n").unwrap();
        let image = dir.path().join("pixel.png");
        RgbImage::from_pixel(1, 1, Rgb([10, 200, 30])).save(&image).unwrap();
        let params = Parameters::new(dir.path().join("identity.onnx"), image, labels);

        let (result, output) = transcript(&params, &PassThrough, "1\n");
        result.unwrap();
        assert_eq!(output.matches("Please enter the index").count(), 1);
        assert!(!output.contains("Invalid index"));
        assert!(output.contains("Index: 0, Description: GeForce RTX 3080\n"));
        assert!(output.contains("Selected adapter at index 1\n"));
        assert!(output.ends_with(
            "Running the model...\n\
             dog with confidence of 200.000000\n\
             fish with confidence of 30.000000\n\
             cat with confidence of 10.000000\n"
        ));
    }

    #[test]
    fn missing_labels_is_fatal_before_anything() {
        let dir = tempfile::tempdir().unwrap();
        let params = Parameters::new(
            dir.path().join("model.onnx"),
            dir.path().join("kitten.jpg"),
            dir.path().join("labels.txt"),
        );
        let mut input = Cursor::new(b"1\n".to_vec());
        let mut output = vec![];
        let err = run(&params, &gpus(), &PassThrough, &mut input, &mut output).unwrap_err();
        assert!(err.to_string().contains("labels.txt"));
        assert!(output.is_empty());
        assert_eq!(input.position(), 0);
    }

    #[test]
    fn missing_model_prints_no_result() {
        let dir = tempfile::tempdir().unwrap();
        let labels = dir.path().join("labels.txt");
        std::fs::write(&labels, "0,cat\n1,dog\n").unwrap();
        let params =
            Parameters::new(dir.path().join("model.onnx"), dir.path().join("kitten.jpg"), labels);
        let (result, output) = transcript(&params, &OnnxLoader, "1\n");
        assert!(result.is_err());
        assert!(output.contains("Selected adapter at index 1"));
        assert!(output.ends_with("on the selected device\n"));
        assert!(!output.contains("with confidence of"));
    }

    #[test]
    fn forced_cpu_reads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let labels = dir.path().join("labels.txt");
        std::fs::write(&labels, "0,cat\n").unwrap();
        let mut params =
            Parameters::new(dir.path().join("model.onnx"), dir.path().join("kitten.jpg"), labels);
        params.force_cpu = true;
        let mut input = Cursor::new(b"1\n".to_vec());
        let mut output = vec![];
        assert!(run(&params, &gpus(), &PassThrough, &mut input, &mut output).is_err());
        assert_eq!(input.position(), 0);
        let output = String::from_utf8(output).unwrap();
        assert!(!output.contains("Please enter"));
        assert!(output.ends_with("Loading the image...\n"));
    }
}
