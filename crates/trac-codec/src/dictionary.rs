use std::collections::HashMap;

use trac_error::{Result, TracError};

/// Staging area for one categorical-string column.
///
/// Raw strings accumulate into `staging` as rows are parsed. At batch
/// completion, [`DictionaryStage::finalize_batch`] encodes the staged values
/// into dictionary indices: a dynamic dictionary grows to accommodate new
/// values, while a static (fixed) dictionary rejects any value it does not
/// already contain with `ENUM_VALUE_NOT_IN_DICTIONARY`.
#[derive(Debug, Clone)]
pub struct DictionaryStage {
    dynamic: bool,
    values: Vec<String>,
    index_of: HashMap<String, i32>,
    staging: Vec<Option<String>>,
}

impl DictionaryStage {
    pub fn new(dynamic: bool, initial_values: Vec<String>) -> Self {
        let mut index_of = HashMap::with_capacity(initial_values.len());
        for (i, v) in initial_values.iter().enumerate() {
            index_of.insert(v.clone(), i as i32);
        }
        Self {
            dynamic,
            values: initial_values,
            index_of,
            staging: Vec::new(),
        }
    }

    pub fn dictionary(&self) -> &[String] {
        &self.values
    }

    /// Accumulates one raw value (or null) for the row currently being
    /// parsed.
    pub fn stage(&mut self, value: Option<String>) {
        self.staging.push(value);
    }

    /// Encodes all staged values into dictionary indices, extending the
    /// dictionary if it is dynamic, and clears the staging vector for the
    /// next batch.
    pub fn finalize_batch(&mut self) -> Result<Vec<Option<i32>>> {
        let mut indices = Vec::with_capacity(self.staging.len());

        for raw in self.staging.drain(..) {
            match raw {
                None => indices.push(None),
                Some(value) => {
                    let idx = match self.index_of.get(&value) {
                        Some(idx) => *idx,
                        None if self.dynamic => {
                            let idx = self.values.len() as i32;
                            self.values.push(value.clone());
                            self.index_of.insert(value, idx);
                            idx
                        }
                        None => {
                            return Err(TracError::DataConstraint(format!(
                                "ENUM_VALUE_NOT_IN_DICTIONARY: '{value}' is not a member of the fixed dictionary"
                            )));
                        }
                    };
                    indices.push(Some(idx));
                }
            }
        }

        Ok(indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_dictionary_grows_to_accommodate_new_values() {
        let mut stage = DictionaryStage::new(true, vec!["red".into()]);
        stage.stage(Some("red".into()));
        stage.stage(Some("blue".into()));
        stage.stage(None);

        let indices = stage.finalize_batch().unwrap();
        assert_eq!(indices, vec![Some(0), Some(1), None]);
        assert_eq!(stage.dictionary(), &["red", "blue"]);
    }

    #[test]
    fn static_dictionary_rejects_unknown_values() {
        let mut stage = DictionaryStage::new(false, vec!["red".into(), "blue".into()]);
        stage.stage(Some("green".into()));

        let err = stage.finalize_batch().unwrap_err();
        assert!(matches!(err, TracError::DataConstraint(_)));
    }
}
