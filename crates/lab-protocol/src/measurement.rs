//! Measurement Kinds and LOINC Lookup
//!
//! Defines the fixed set of hemogram measurements and the LOINC codes that map onto them.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Hemogram measurement kinds extracted from panel components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementKind {
    /// White blood cell count (/µL)
    Leukocytes,
    /// Red blood cell count
    Erythrocytes,
    /// Hemoglobin (g/dL)
    Hemoglobin,
    /// Hematocrit (%)
    Hematocrit,
    /// Platelet count (/µL)
    Platelets,
    /// Mean corpuscular volume (fL)
    Mcv,
    /// Mean corpuscular hemoglobin (pg)
    Mch,
    /// Mean corpuscular hemoglobin concentration (g/dL)
    Mchc,
    /// Red cell distribution width, coefficient of variation (%)
    RdwCv,
    /// Red cell distribution width, standard deviation (fL)
    RdwSd,
    /// Neutrophils (%)
    Neutrophils,
    /// Lymphocytes (%)
    Lymphocytes,
    /// Monocytes (%)
    Monocytes,
    /// Eosinophils (%)
    Eosinophils,
    /// Basophils (%)
    Basophils,
    /// Neutrophils, absolute count (/µL)
    NeutrophilsAbs,
    /// Lymphocytes, absolute count (/µL)
    LymphocytesAbs,
    /// Monocytes, absolute count (/µL)
    MonocytesAbs,
    /// Eosinophils, absolute count (/µL)
    EosinophilsAbs,
    /// Basophils, absolute count (/µL)
    BasophilsAbs,
    /// Mean platelet volume (fL)
    Mpv,
    /// Platelet distribution width (fL)
    Pdw,
}

impl MeasurementKind {
    /// Number of measurement kinds
    pub const COUNT: usize = 22;

    /// All kinds in slot order
    pub const ALL: [MeasurementKind; Self::COUNT] = [
        MeasurementKind::Leukocytes,
        MeasurementKind::Erythrocytes,
        MeasurementKind::Hemoglobin,
        MeasurementKind::Hematocrit,
        MeasurementKind::Platelets,
        MeasurementKind::Mcv,
        MeasurementKind::Mch,
        MeasurementKind::Mchc,
        MeasurementKind::RdwCv,
        MeasurementKind::RdwSd,
        MeasurementKind::Neutrophils,
        MeasurementKind::Lymphocytes,
        MeasurementKind::Monocytes,
        MeasurementKind::Eosinophils,
        MeasurementKind::Basophils,
        MeasurementKind::NeutrophilsAbs,
        MeasurementKind::LymphocytesAbs,
        MeasurementKind::MonocytesAbs,
        MeasurementKind::EosinophilsAbs,
        MeasurementKind::BasophilsAbs,
        MeasurementKind::Mpv,
        MeasurementKind::Pdw,
    ];

    /// Map a LOINC component code to a measurement kind
    pub fn from_loinc(code: &str) -> Option<Self> {
        let kind = match code {
            "6690-2" | "33747-0" => MeasurementKind::Leukocytes,
            "789-8" => MeasurementKind::Erythrocytes,
            "718-7" | "30313-1" => MeasurementKind::Hemoglobin,
            "4544-3" | "31100-1" => MeasurementKind::Hematocrit,
            "777-3" | "26515-7" => MeasurementKind::Platelets,
            "787-2" => MeasurementKind::Mcv,
            "785-6" => MeasurementKind::Mch,
            "786-4" => MeasurementKind::Mchc,
            "788-0" => MeasurementKind::RdwCv,
            "21000-5" => MeasurementKind::RdwSd,
            "770-8" => MeasurementKind::Neutrophils,
            "736-9" => MeasurementKind::Lymphocytes,
            "5905-5" => MeasurementKind::Monocytes,
            "713-8" => MeasurementKind::Eosinophils,
            "706-2" => MeasurementKind::Basophils,
            "751-8" => MeasurementKind::NeutrophilsAbs,
            "731-0" => MeasurementKind::LymphocytesAbs,
            "742-7" => MeasurementKind::MonocytesAbs,
            "711-2" => MeasurementKind::EosinophilsAbs,
            "704-7" => MeasurementKind::BasophilsAbs,
            "32623-1" => MeasurementKind::Mpv,
            "49498-9" => MeasurementKind::Pdw,
            _ => return None,
        };
        Some(kind)
    }

    /// Primary LOINC code for this kind
    pub fn loinc(&self) -> &'static str {
        match self {
            MeasurementKind::Leukocytes => "6690-2",
            MeasurementKind::Erythrocytes => "789-8",
            MeasurementKind::Hemoglobin => "718-7",
            MeasurementKind::Hematocrit => "4544-3",
            MeasurementKind::Platelets => "777-3",
            MeasurementKind::Mcv => "787-2",
            MeasurementKind::Mch => "785-6",
            MeasurementKind::Mchc => "786-4",
            MeasurementKind::RdwCv => "788-0",
            MeasurementKind::RdwSd => "21000-5",
            MeasurementKind::Neutrophils => "770-8",
            MeasurementKind::Lymphocytes => "736-9",
            MeasurementKind::Monocytes => "5905-5",
            MeasurementKind::Eosinophils => "713-8",
            MeasurementKind::Basophils => "706-2",
            MeasurementKind::NeutrophilsAbs => "751-8",
            MeasurementKind::LymphocytesAbs => "731-0",
            MeasurementKind::MonocytesAbs => "742-7",
            MeasurementKind::EosinophilsAbs => "711-2",
            MeasurementKind::BasophilsAbs => "704-7",
            MeasurementKind::Mpv => "32623-1",
            MeasurementKind::Pdw => "49498-9",
        }
    }

    /// Field name used in serialized output
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementKind::Leukocytes => "leukocytes",
            MeasurementKind::Erythrocytes => "erythrocytes",
            MeasurementKind::Hemoglobin => "hemoglobin",
            MeasurementKind::Hematocrit => "hematocrit",
            MeasurementKind::Platelets => "platelets",
            MeasurementKind::Mcv => "mcv",
            MeasurementKind::Mch => "mch",
            MeasurementKind::Mchc => "mchc",
            MeasurementKind::RdwCv => "rdw_cv",
            MeasurementKind::RdwSd => "rdw_sd",
            MeasurementKind::Neutrophils => "neutrophils",
            MeasurementKind::Lymphocytes => "lymphocytes",
            MeasurementKind::Monocytes => "monocytes",
            MeasurementKind::Eosinophils => "eosinophils",
            MeasurementKind::Basophils => "basophils",
            MeasurementKind::NeutrophilsAbs => "neutrophils_abs",
            MeasurementKind::LymphocytesAbs => "lymphocytes_abs",
            MeasurementKind::MonocytesAbs => "monocytes_abs",
            MeasurementKind::EosinophilsAbs => "eosinophils_abs",
            MeasurementKind::BasophilsAbs => "basophils_abs",
            MeasurementKind::Mpv => "mpv",
            MeasurementKind::Pdw => "pdw",
        }
    }

    fn slot(&self) -> usize {
        *self as usize
    }
}

/// A single numeric result with its reported unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub value: f64,
    pub unit: Option<String>,
}

impl Measurement {
    pub fn new(value: f64, unit: Option<&str>) -> Self {
        Self {
            value,
            unit: unit.map(str::to_string),
        }
    }
}

/// Fixed-shape measurement record, one optional slot per kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurements {
    slots: [Option<Measurement>; MeasurementKind::COUNT],
}

impl Measurements {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a measurement by kind
    pub fn get(&self, kind: MeasurementKind) -> Option<&Measurement> {
        self.slots[kind.slot()].as_ref()
    }

    /// Get only the numeric value of a measurement
    pub fn value(&self, kind: MeasurementKind) -> Option<f64> {
        self.get(kind).map(|m| m.value)
    }

    /// Set a measurement, replacing any previous value for the kind
    pub fn set(&mut self, kind: MeasurementKind, measurement: Measurement) {
        self.slots[kind.slot()] = Some(measurement);
    }

    /// Builder-style setter
    pub fn with(mut self, kind: MeasurementKind, value: f64, unit: Option<&str>) -> Self {
        self.set(kind, Measurement::new(value, unit));
        self
    }

    /// Iterate over present measurements in slot order
    pub fn iter(&self) -> impl Iterator<Item = (MeasurementKind, &Measurement)> {
        MeasurementKind::ALL
            .iter()
            .zip(self.slots.iter())
            .filter_map(|(kind, slot)| slot.as_ref().map(|m| (*kind, m)))
    }

    /// Number of present measurements
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Serialize for Measurements {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (kind, measurement) in self.iter() {
            map.serialize_entry(kind.as_str(), measurement)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loinc_round_trip() {
        for kind in MeasurementKind::ALL {
            assert_eq!(MeasurementKind::from_loinc(kind.loinc()), Some(kind));
        }
    }

    #[test]
    fn test_automated_count_aliases() {
        assert_eq!(MeasurementKind::from_loinc("33747-0"), Some(MeasurementKind::Leukocytes));
        assert_eq!(MeasurementKind::from_loinc("30313-1"), Some(MeasurementKind::Hemoglobin));
        assert_eq!(MeasurementKind::from_loinc("26515-7"), Some(MeasurementKind::Platelets));
        assert_eq!(MeasurementKind::from_loinc("31100-1"), Some(MeasurementKind::Hematocrit));
        assert_eq!(MeasurementKind::from_loinc("0000-0"), None);
    }

    #[test]
    fn test_slots_match_all_order() {
        for (i, kind) in MeasurementKind::ALL.iter().enumerate() {
            assert_eq!(kind.slot(), i);
        }
    }

    #[test]
    fn test_set_and_iter() {
        let m = Measurements::new()
            .with(MeasurementKind::Hemoglobin, 9.5, Some("g/dL"))
            .with(MeasurementKind::Leukocytes, 3200.0, Some("/uL"));

        assert_eq!(m.len(), 2);
        assert_eq!(m.value(MeasurementKind::Hemoglobin), Some(9.5));
        assert!(m.get(MeasurementKind::Platelets).is_none());

        let kinds: Vec<_> = m.iter().map(|(k, _)| k).collect();
        assert_eq!(kinds, vec![MeasurementKind::Leukocytes, MeasurementKind::Hemoglobin]);
    }

    #[test]
    fn test_serialize_as_map() {
        let m = Measurements::new().with(MeasurementKind::LymphocytesAbs, 850.0, Some("/uL"));
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["lymphocytes_abs"]["value"], 850.0);
        assert_eq!(json["lymphocytes_abs"]["unit"], "/uL");
    }
}
