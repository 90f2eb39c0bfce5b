//! Labeled datasets: sample model, class label sets, JSON/CSV loaders and the
//! synthetic galaxy generator.
use crate::error::{LabError, Result};
use crate::projection::LinearProjection;
use crate::rng::SequenceGenerator;
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt::Debug;
use std::hash::Hash;
use std::io::Read;

/// A closed, canonically ordered set of class labels.
pub trait ClassLabel: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// Canonical ordering; a label's index is its position here.
    const ALL: &'static [Self];

    fn name(self) -> &'static str;

    fn index(self) -> usize {
        Self::ALL.iter().position(|&l| l == self).unwrap_or(0)
    }

    fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    fn count() -> usize {
        Self::ALL.len()
    }

    /// Case-insensitive lookup by name; a leading `iris-` is ignored.
    fn parse(raw: &str) -> Option<Self> {
        let norm = raw.trim().trim_matches('"').to_lowercase();
        let norm = norm.trim_start_matches("iris-");
        Self::ALL
            .iter()
            .copied()
            .find(|l| l.name().eq_ignore_ascii_case(norm))
    }
}

/// Iris species
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Species {
    Setosa,
    Versicolor,
    Virginica,
}

impl ClassLabel for Species {
    const ALL: &'static [Self] = &[Species::Setosa, Species::Versicolor, Species::Virginica];

    fn name(self) -> &'static str {
        match self {
            Species::Setosa => "Setosa",
            Species::Versicolor => "Versicolor",
            Species::Virginica => "Virginica",
        }
    }
}

/// Synthetic galaxy patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GalaxyClass {
    Orion,
    Andromeda,
    Centaurus,
}

impl ClassLabel for GalaxyClass {
    const ALL: &'static [Self] = &[GalaxyClass::Orion, GalaxyClass::Andromeda, GalaxyClass::Centaurus];

    fn name(self) -> &'static str {
        match self {
            GalaxyClass::Orion => "Orion",
            GalaxyClass::Andromeda => "Andromeda",
            GalaxyClass::Centaurus => "Centaurus",
        }
    }
}

/// One labeled observation. `plane` holds the 2-D visualization coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample<L> {
    pub id: usize,
    pub features: Vec<f64>,
    pub plane: [f64; 2],
    pub label: L,
}

/// One-hot encode
pub fn one_hot(label: usize, num_classes: usize) -> Vec<f64> {
    let mut v = vec![0.0; num_classes];
    if label < num_classes {
        v[label] = 1.0;
    }
    v
}

/// An ordered, read-only collection of samples sharing one feature length.
#[derive(Debug, Clone)]
pub struct Dataset<L> {
    feature_names: Vec<String>,
    samples: Vec<Sample<L>>,
}

impl<L: ClassLabel> Dataset<L> {
    pub fn new(feature_names: Vec<String>, samples: Vec<Sample<L>>) -> Result<Self> {
        if feature_names.is_empty() {
            return Err(LabError::InvalidDataset("no feature columns".into()));
        }
        if let Some(bad) = samples.iter().find(|s| s.features.len() != feature_names.len()) {
            return Err(LabError::InvalidDataset(format!(
                "sample {} has {} features, expected {}",
                bad.id,
                bad.features.len(),
                feature_names.len()
            )));
        }
        if let Some(bad) = samples
            .iter()
            .find(|s| s.features.iter().chain(&s.plane).any(|v| !v.is_finite()))
        {
            return Err(LabError::InvalidDataset(format!("sample {} has a non-finite value", bad.id)));
        }
        Ok(Self { feature_names, samples })
    }

    pub fn samples(&self) -> &[Sample<L>] {
        &self.samples
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn feature_count(&self) -> usize {
        self.feature_names.len()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

pub const FLOWER_FEATURES: [&str; 4] = ["sepalLength", "sepalWidth", "petalLength", "petalWidth"];
pub const GALAXY_FEATURES: [&str; 4] = ["orbitRadius", "orbitalSpeed", "luminosity", "turbulence"];

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlowerRecord {
    #[serde(default)]
    id: Option<usize>,
    sepal_length: f64,
    sepal_width: f64,
    petal_length: f64,
    petal_width: f64,
    pca_x: f64,
    pca_y: f64,
    species: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GalaxyRecord {
    #[serde(default)]
    id: Option<usize>,
    orbit_radius: f64,
    orbital_speed: f64,
    luminosity: f64,
    turbulence: f64,
    pca_x: f64,
    pca_y: f64,
    pattern: String,
}

fn parse_label<L: ClassLabel>(raw: &str) -> Result<L> {
    L::parse(raw).ok_or_else(|| LabError::InvalidDataset(format!("unknown class label: {raw}")))
}

/// Load the flowers variant from a JSON array of flat records.
/// A record without an `id` takes its position as the id.
pub fn load_flowers_json(json: &str) -> Result<Dataset<Species>> {
    let records: Vec<FlowerRecord> = serde_json::from_str(json)?;
    let samples = records
        .into_iter()
        .enumerate()
        .map(|(index, r)| {
            Ok(Sample {
                id: r.id.unwrap_or(index),
                features: vec![r.sepal_length, r.sepal_width, r.petal_length, r.petal_width],
                plane: [r.pca_x, r.pca_y],
                label: parse_label(&r.species)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Dataset::new(names(&FLOWER_FEATURES), samples)
}

/// Load the galaxies variant from a JSON array of flat records.
pub fn load_galaxies_json(json: &str) -> Result<Dataset<GalaxyClass>> {
    let records: Vec<GalaxyRecord> = serde_json::from_str(json)?;
    let samples = records
        .into_iter()
        .enumerate()
        .map(|(index, r)| {
            Ok(Sample {
                id: r.id.unwrap_or(index),
                features: vec![r.orbit_radius, r.orbital_speed, r.luminosity, r.turbulence],
                plane: [r.pca_x, r.pca_y],
                label: parse_label(&r.pattern)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Dataset::new(names(&GALAXY_FEATURES), samples)
}

/// Load Iris from CSV (header row, four numeric columns, then the species).
///
/// The CSV carries no plane coordinates, so a two-component PCA basis is fitted
/// on the features and returned alongside the dataset for the boundary view.
pub fn load_flowers_csv<R: Read>(reader: R) -> Result<(Dataset<Species>, LinearProjection)> {
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);
    let mut rows = Vec::new();
    let mut labels = Vec::new();
    for result in rdr.records() {
        let record = result?;
        if record.len() != 5 {
            continue;
        }
        let features = record
            .iter()
            .take(4)
            .map(|s| {
                s.trim()
                    .parse::<f64>()
                    .map_err(|e| LabError::InvalidDataset(format!("bad number {s:?}: {e}")))
            })
            .collect::<Result<Vec<f64>>>()?;
        labels.push(parse_label::<Species>(&record[4])?);
        rows.push(features);
    }
    if rows.is_empty() {
        return Err(LabError::InvalidDataset("no data loaded from Iris CSV".into()));
    }
    let projection = LinearProjection::fit(&rows)?;
    let samples = rows
        .into_iter()
        .zip(labels)
        .enumerate()
        .map(|(id, (features, label))| Sample {
            id,
            plane: projection.project(&features),
            features,
            label,
        })
        .collect();
    Ok((Dataset::new(names(&FLOWER_FEATURES), samples)?, projection))
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Generate the synthetic spiral "galaxies" dataset.
///
/// Each class sits on its own ring (radius grows with the class index) with a
/// phase offset; luminosity and turbulence follow the angle with per-class
/// shifts. All values are rounded to three decimals.
pub fn generate_galaxies(per_class: usize, seed: u64) -> Dataset<GalaxyClass> {
    const OFFSETS: [f64; 3] = [0.0, 2.1, 4.2];
    let mut rng = SequenceGenerator::new(seed);
    let mut noise = |scale: f64| (rng.next_f64() - 0.5) * 2.0 * scale;
    let mut samples = Vec::with_capacity(per_class * GalaxyClass::count());

    for (class_index, (&label, &offset)) in GalaxyClass::ALL.iter().zip(&OFFSETS).enumerate() {
        let ci = class_index as f64;
        for i in 0..per_class {
            let base_angle = (i as f64 / per_class as f64) * PI * 2.0 + offset;
            let radius = 1.3 + ci * 0.8 + noise(0.35);
            let angle = base_angle + noise(0.25);
            let x = radius * angle.cos() + noise(0.4);
            let y = radius * angle.sin() + noise(0.4);
            let orbital_speed = radius * (1.2 + noise(0.2)) + ci * 0.4;
            let luminosity = (angle * 2.0 + ci * 0.3).sin() + ci * 0.8 + noise(0.5);
            let turbulence = (angle * 1.5).cos() * 0.7 + ci * 0.5 + noise(0.6);
            samples.push(Sample {
                id: samples.len(),
                features: vec![
                    round3(radius),
                    round3(orbital_speed),
                    round3(luminosity),
                    round3(turbulence),
                ],
                plane: [round3(x), round3(y)],
                label,
            });
        }
    }
    Dataset {
        feature_names: names(&GALAXY_FEATURES),
        samples,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_parsing_is_lenient() {
        assert_eq!(Species::parse("Iris-setosa"), Some(Species::Setosa));
        assert_eq!(Species::parse("\"virginica\""), Some(Species::Virginica));
        assert_eq!(Species::parse("VERSICOLOR"), Some(Species::Versicolor));
        assert_eq!(Species::parse("rose"), None);
        assert_eq!(GalaxyClass::parse("andromeda"), Some(GalaxyClass::Andromeda));
    }

    #[test]
    fn label_indices_follow_canonical_order() {
        assert_eq!(GalaxyClass::Centaurus.index(), 2);
        assert_eq!(Species::from_index(1), Some(Species::Versicolor));
        assert_eq!(Species::from_index(3), None);
        assert_eq!(one_hot(1, 3), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn loads_flower_records() {
        let json = r#"[
            {"sepalLength":5.1,"sepalWidth":3.5,"petalLength":1.4,"petalWidth":0.2,"pcaX":-2.26,"pcaY":0.48,"species":"Setosa"},
            {"sepalLength":6.3,"sepalWidth":3.3,"petalLength":6.0,"petalWidth":2.5,"pcaX":1.8,"pcaY":0.3,"species":"Virginica"}
        ]"#;
        let ds = load_flowers_json(json).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.samples()[1].id, 1);
        assert_eq!(ds.samples()[1].label, Species::Virginica);
        assert_eq!(ds.samples()[0].plane, [-2.26, 0.48]);
    }

    #[test]
    fn record_ids_are_kept_when_present() {
        let json = r#"[
            {"id":41,"orbitRadius":1.3,"orbitalSpeed":1.6,"luminosity":0.2,"turbulence":0.7,"pcaX":1.1,"pcaY":0.2,"pattern":"Orion"},
            {"orbitRadius":2.1,"orbitalSpeed":2.9,"luminosity":1.0,"turbulence":1.2,"pcaX":-0.4,"pcaY":1.9,"pattern":"Andromeda"}
        ]"#;
        let ds = load_galaxies_json(json).unwrap();
        assert_eq!(ds.samples()[0].id, 41);
        assert_eq!(ds.samples()[1].id, 1);
    }

    #[test]
    fn rejects_unknown_label() {
        let json = r#"[{"orbitRadius":1,"orbitalSpeed":1,"luminosity":1,"turbulence":1,"pcaX":0,"pcaY":0,"pattern":"Vega"}]"#;
        assert!(matches!(load_galaxies_json(json), Err(LabError::InvalidDataset(_))));
    }

    #[test]
    fn loads_iris_csv_with_fitted_plane() {
        let csv = "sepal_length,sepal_width,petal_length,petal_width,species\n\
                   5.1,3.5,1.4,0.2,Iris-setosa\n\
                   4.9,3.0,1.4,0.2,Iris-setosa\n\
                   7.0,3.2,4.7,1.4,Iris-versicolor\n\
                   6.3,3.3,6.0,2.5,Iris-virginica\n";
        let (ds, projection) = load_flowers_csv(csv.as_bytes()).unwrap();
        assert_eq!(ds.len(), 4);
        assert_eq!(ds.samples()[2].label, Species::Versicolor);
        let p = projection.project(&ds.samples()[3].features);
        assert_eq!(p, ds.samples()[3].plane);
    }

    #[test]
    fn galaxy_generator_is_deterministic() {
        let a = generate_galaxies(20, 2024);
        let b = generate_galaxies(20, 2024);
        assert_eq!(a.len(), 60);
        assert_eq!(a.samples(), b.samples());
        assert_eq!(a.samples()[20].label, GalaxyClass::Andromeda);
        assert!(a.samples().iter().all(|s| s.features.len() == 4));
    }
}
