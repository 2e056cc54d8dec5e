use serde::Serialize;

/// Placeholder shown when a metric has no underlying data
pub const NO_DATA: &str = "-";

/// Placeholder shown when the source for a metric could not be reached
pub const UNAVAILABLE: &str = "N/A";

/// Why a field of a fetch batch holds no value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Absence {
    /// The source answered, but had nothing for the requested window
    NoData,
    /// Network, rate-limit or malformed response; worth retrying later
    Transient(String),
    /// Credentials or zone are wrong; retrying will not help
    Fatal(String),
}

impl Absence {
    pub fn placeholder(&self) -> &'static str {
        match self {
            Absence::NoData => NO_DATA,
            Absence::Transient(_) | Absence::Fatal(_) => UNAVAILABLE,
        }
    }
}

/// One independently fetched value of a batch.
///
/// A failed or empty upstream query ends up as `Absent` for that field only,
/// the rest of the batch is unaffected.
#[derive(Debug, Clone, PartialEq)]
pub enum Field<T> {
    Present(T),
    Absent(Absence),
}

impl<T> Field<T> {
    pub fn present(&self) -> Option<&T> {
        match self {
            Field::Present(value) => Some(value),
            Field::Absent(_) => None,
        }
    }

    pub fn absence(&self) -> Option<&Absence> {
        match self {
            Field::Present(_) => None,
            Field::Absent(absence) => Some(absence),
        }
    }

    pub fn placeholder(&self) -> &'static str {
        self.absence().map_or(NO_DATA, Absence::placeholder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_distinguish_no_data_from_failures() {
        assert_eq!(Field::<f64>::Absent(Absence::NoData).placeholder(), "-");
        assert_eq!(
            Field::<f64>::Absent(Absence::Transient("timeout".into())).placeholder(),
            "N/A"
        );
        assert_eq!(
            Field::<f64>::Absent(Absence::Fatal("401".into())).placeholder(),
            "N/A"
        );
    }

    #[test]
    fn test_present_accessors() {
        let field = Field::Present(4.2);
        assert!(field.present().is_some());
        assert_eq!(field.present(), Some(&4.2));
        assert!(field.absence().is_none());
    }

    #[test]
    fn test_absence_serializes_with_status_tag() {
        let json = serde_json::to_value(Absence::Transient("rate limited".into())).unwrap();
        assert_eq!(json["status"], "transient");
        assert_eq!(json["reason"], "rate limited");

        let json = serde_json::to_value(Absence::NoData).unwrap();
        assert_eq!(json["status"], "no_data");
    }
}
