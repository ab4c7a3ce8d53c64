use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::ClassifyError;

/// Column holding the human-readable class name.
pub const DISPLAY_NAME_COLUMN: &str = "display_name";

/// Class names in model output order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    names: Vec<String>,
}

impl LabelTable {
    pub fn new(names: Vec<String>) -> Result<Self, ClassifyError> {
        if names.is_empty() {
            return Err(ClassifyError::Startup("label table is empty".into()));
        }
        Ok(Self { names })
    }

    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self, ClassifyError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            ClassifyError::Startup(format!("cannot open class map {}: {e}", path.display()))
        })?;
        Self::from_reader(file)
            .map_err(|e| ClassifyError::Startup(format!("{}: {e}", path.display())))
    }

    /// Reads a headered CSV and collects the `display_name` column.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ClassifyError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);

        let headers = reader
            .headers()
            .map_err(|e| ClassifyError::Startup(format!("unreadable header: {e}")))?;
        let column = headers
            .iter()
            .position(|h| h.trim() == DISPLAY_NAME_COLUMN)
            .ok_or_else(|| {
                ClassifyError::Startup(format!("missing `{DISPLAY_NAME_COLUMN}` column"))
            })?;

        let mut names = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record
                .map_err(|e| ClassifyError::Startup(format!("malformed row {}: {e}", row + 1)))?;
            let name = record.get(column).ok_or_else(|| {
                ClassifyError::Startup(format!("row {} has no `{DISPLAY_NAME_COLUMN}`", row + 1))
            })?;
            names.push(name.to_string());
        }

        Self::new(names)
    }

    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CLASS_MAP: &str = "index,mid,display_name\n\
        0,/m/09x0r,Speech\n\
        1,/m/0ytgt,\"Child speech, kid speaking\"\n\
        2,/m/028ght,Silence\n";

    #[test]
    fn reads_display_names_in_index_order() {
        let table = LabelTable::from_reader(CLASS_MAP.as_bytes()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.name_at(0), Some("Speech"));
        assert_eq!(table.name_at(1), Some("Child speech, kid speaking"));
        assert_eq!(table.name_at(2), Some("Silence"));
        assert_eq!(table.name_at(3), None);
    }

    #[test]
    fn column_is_found_by_header_name() {
        let csv = "display_name,index\nDog,0\nCat,1\n";
        let table = LabelTable::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.name_at(0), Some("Dog"));
        assert_eq!(table.name_at(1), Some("Cat"));
    }

    #[test]
    fn missing_column_fails() {
        let csv = "index,mid,name\n0,/m/x,Speech\n";
        let err = LabelTable::from_reader(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, ClassifyError::Startup(_)));
        assert!(err.to_string().contains("display_name"));
    }

    #[test]
    fn ragged_row_fails() {
        let csv = "index,mid,display_name\n0,/m/x,Speech\n1,/m/y\n";
        let err = LabelTable::from_reader(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, ClassifyError::Startup(_)));
    }

    #[test]
    fn header_only_file_fails() {
        let csv = "index,mid,display_name\n";
        assert!(LabelTable::from_reader(csv.as_bytes()).is_err());
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CLASS_MAP.as_bytes()).unwrap();

        let table = LabelTable::from_csv_path(file.path()).unwrap();
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn missing_file_fails_with_path() {
        let err = LabelTable::from_csv_path("/nonexistent/yamnet_class_map.csv").unwrap_err();
        assert!(matches!(err, ClassifyError::Startup(_)));
        assert!(err.to_string().contains("yamnet_class_map.csv"));
    }
}
