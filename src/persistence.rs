use ndarray::{Array2, Dimension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::data::scaler::StandardScaler;
use crate::error::{ForecastError, Result};
use crate::models::sequential::Sequential;

/// Serializable version of Array2<f64> for persistence
#[derive(Serialize, Deserialize)]
pub struct SerializableArray2 {
    data: Vec<f64>,
    shape: (usize, usize),
}

impl From<&Array2<f64>> for SerializableArray2 {
    fn from(array: &Array2<f64>) -> Self {
        Self {
            data: array.iter().cloned().collect(),
            shape: array.raw_dim().into_pattern(),
        }
    }
}

impl SerializableArray2 {
    pub fn into_array(self) -> std::result::Result<Array2<f64>, ndarray::ShapeError> {
        Array2::from_shape_vec(self.shape, self.data)
    }
}

/// `#[serde(with = "array2_serde")]` adapter storing a matrix as shape plus row-major data
pub mod array2_serde {
    use super::SerializableArray2;
    use ndarray::Array2;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(array: &Array2<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        SerializableArray2::from(array).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Array2<f64>, D::Error> {
        SerializableArray2::deserialize(deserializer)?
            .into_array()
            .map_err(D::Error::custom)
    }
}

/// On-disk encoding of a saved model
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveFormat {
    /// Human-readable
    Json,
    /// Compact bincode
    #[default]
    Binary,
}

impl SaveFormat {
    /// Format implied by a file extension; anything but `.json` is binary
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => SaveFormat::Json,
            _ => SaveFormat::Binary,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SaveFormat::Json => "json",
            SaveFormat::Binary => "bin",
        }
    }
}

/// Model metadata for tracking training information
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ModelMetadata {
    pub model_name: String,
    pub version: String,
    pub created_at: String,
    pub num_parameters: usize,
    /// Epoch (1-based) the weights were captured at
    pub epoch: usize,
    pub train_loss: Option<f64>,
    pub val_loss: Option<f64>,
    pub description: Option<String>,
}

/// Complete saved model including network, metadata and normalization statistics
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SavedModel {
    pub model: Sequential,
    pub metadata: ModelMetadata,
    pub scaler: Option<StandardScaler>,
}

/// Model persistence operations
pub struct ModelPersistence;

impl ModelPersistence {
    /// Save model to JSON format (human-readable)
    pub fn save_to_json<P: AsRef<Path>>(model: &SavedModel, path: P) -> Result<()> {
        write_json(model, path)
    }

    /// Load model from JSON format
    pub fn load_from_json<P: AsRef<Path>>(path: P) -> Result<SavedModel> {
        read_json(path)
    }

    /// Save model to binary format (compact and fast)
    pub fn save_to_binary<P: AsRef<Path>>(model: &SavedModel, path: P) -> Result<()> {
        let encoded = bincode::serialize(model)?;
        let mut file = File::create(path)?;
        file.write_all(&encoded)?;
        Ok(())
    }

    /// Load model from binary format
    pub fn load_from_binary<P: AsRef<Path>>(path: P) -> Result<SavedModel> {
        let mut file = File::open(path)?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        Ok(bincode::deserialize(&contents)?)
    }

    /// Save with the format chosen by file extension
    pub fn save<P: AsRef<Path>>(model: &SavedModel, path: P) -> Result<()> {
        match SaveFormat::from_path(path.as_ref()) {
            SaveFormat::Json => Self::save_to_json(model, path),
            SaveFormat::Binary => Self::save_to_binary(model, path),
        }
    }

    /// Load with the format chosen by file extension
    pub fn load<P: AsRef<Path>>(path: P) -> Result<SavedModel> {
        match SaveFormat::from_path(path.as_ref()) {
            SaveFormat::Json => Self::load_from_json(path),
            SaveFormat::Binary => Self::load_from_binary(path),
        }
    }

    /// Create a saved model with metadata stamped now
    pub fn create_saved_model(
        model: &Sequential,
        epoch: usize,
        train_loss: Option<f64>,
        val_loss: Option<f64>,
        scaler: Option<StandardScaler>,
        description: Option<String>,
    ) -> SavedModel {
        let metadata = ModelMetadata {
            model_name: model.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            num_parameters: model.num_parameters(),
            epoch,
            train_loss,
            val_loss,
            description,
        };

        SavedModel {
            model: model.clone(),
            metadata,
            scaler,
        }
    }
}

/// Convenience trait for easy model saving/loading
pub trait PersistentModel {
    /// Save model to file (format determined by file extension)
    fn save<P: AsRef<Path>>(&self, path: P, metadata: ModelMetadata) -> Result<()>;

    /// Load model from file (format determined by file extension)
    fn load<P: AsRef<Path>>(path: P) -> Result<(Self, ModelMetadata)>
    where
        Self: Sized;
}

impl PersistentModel for Sequential {
    fn save<P: AsRef<Path>>(&self, path: P, metadata: ModelMetadata) -> Result<()> {
        let saved_model = SavedModel {
            model: self.clone(),
            metadata,
            scaler: None,
        };
        ModelPersistence::save(&saved_model, path)
    }

    fn load<P: AsRef<Path>>(path: P) -> Result<(Self, ModelMetadata)> {
        let saved_model = ModelPersistence::load(path)?;
        Ok((saved_model.model, saved_model.metadata))
    }
}

/// File name of the model inside a checkpoint directory
pub fn checkpoint_file(dir: &Path, format: SaveFormat) -> PathBuf {
    dir.join(format!("model.{}", format.extension()))
}

/// Writes `model.json` or `model.bin` into `dir`, creating the directory.
///
/// A model left in the other format is removed so the directory holds one model.
pub fn save_checkpoint<P: AsRef<Path>>(
    dir: P,
    model: &SavedModel,
    format: SaveFormat,
) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let path = checkpoint_file(dir, format);
    ModelPersistence::save(model, &path)?;

    let other = match format {
        SaveFormat::Json => SaveFormat::Binary,
        SaveFormat::Binary => SaveFormat::Json,
    };
    let stale = checkpoint_file(dir, other);
    if stale.is_file() {
        fs::remove_file(&stale)?;
    }
    Ok(path)
}

/// Removes any model left in `dir` by an earlier run
pub fn clear_checkpoint<P: AsRef<Path>>(dir: P) -> Result<()> {
    for format in [SaveFormat::Binary, SaveFormat::Json] {
        let path = checkpoint_file(dir.as_ref(), format);
        if path.is_file() {
            fs::remove_file(path)?;
        }
    }
    Ok(())
}

/// Loads the model saved in a checkpoint directory, whichever format it used
pub fn load_checkpoint<P: AsRef<Path>>(dir: P) -> Result<SavedModel> {
    let dir = dir.as_ref();
    for format in [SaveFormat::Binary, SaveFormat::Json] {
        let path = checkpoint_file(dir, format);
        if path.is_file() {
            return ModelPersistence::load(path);
        }
    }
    Err(ForecastError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("no model.bin or model.json in {}", dir.display()),
    )))
}

pub fn write_json<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::activation::Activation;
    use crate::models::spec::{LayerSpec, ModelSpec};
    use tempfile::tempdir;

    fn tiny_model() -> Sequential {
        let spec = ModelSpec::new(
            "tiny",
            (3, 2),
            vec![LayerSpec::gru(3), LayerSpec::dense(1, Activation::Linear)],
        );
        Sequential::from_spec(&spec, 9).unwrap()
    }

    #[test]
    fn test_array2_adapter_keeps_layout() {
        #[derive(Serialize, Deserialize)]
        struct Holder {
            #[serde(with = "array2_serde")]
            m: Array2<f64>,
        }

        let holder = Holder {
            m: ndarray::arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]),
        };
        let json = serde_json::to_string(&holder).unwrap();
        assert_eq!(json, r#"{"m":{"data":[1.0,2.0,3.0,4.0,5.0,6.0],"shape":[2,3]}}"#);

        let back: Holder = serde_json::from_str(&json).unwrap();
        assert_eq!(back.m, holder.m);
    }

    #[test]
    fn test_bad_shape_is_an_error() {
        let result: std::result::Result<SerializableArray2, _> =
            serde_json::from_str(r#"{"data":[1.0,2.0,3.0],"shape":[2,2]}"#);
        assert!(result.unwrap().into_array().is_err());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(SaveFormat::from_path(Path::new("a/model.json")), SaveFormat::Json);
        assert_eq!(SaveFormat::from_path(Path::new("a/model.bin")), SaveFormat::Binary);
        assert_eq!(SaveFormat::from_path(Path::new("a/model")), SaveFormat::Binary);
    }

    #[test]
    fn test_checkpoint_directory_round_trip() {
        let dir = tempdir().unwrap();
        let model = tiny_model();
        let saved =
            ModelPersistence::create_saved_model(&model, 4, Some(0.5), Some(0.7), None, None);

        let path = save_checkpoint(dir.path().join("model1"), &saved, SaveFormat::Json).unwrap();
        assert!(path.ends_with("model.json"));

        let loaded = load_checkpoint(dir.path().join("model1")).unwrap();
        assert_eq!(loaded.metadata, saved.metadata);
        assert_eq!(loaded.metadata.epoch, 4);
        assert_eq!(loaded.model.spec(), model.spec());
    }

    #[test]
    fn test_checkpoint_replaces_other_format() {
        let dir = tempdir().unwrap();
        let model = tiny_model();
        let first = ModelPersistence::create_saved_model(&model, 1, Some(0.9), None, None, None);
        let second = ModelPersistence::create_saved_model(&model, 2, Some(0.4), None, None, None);

        save_checkpoint(dir.path(), &first, SaveFormat::Binary).unwrap();
        save_checkpoint(dir.path(), &second, SaveFormat::Json).unwrap();

        assert!(!checkpoint_file(dir.path(), SaveFormat::Binary).exists());
        assert_eq!(load_checkpoint(dir.path()).unwrap().metadata.epoch, 2);

        clear_checkpoint(dir.path()).unwrap();
        assert!(load_checkpoint(dir.path()).is_err());
    }

    #[test]
    fn test_missing_checkpoint() {
        let dir = tempdir().unwrap();
        assert!(matches!(load_checkpoint(dir.path()), Err(ForecastError::Io(_))));
    }
}
