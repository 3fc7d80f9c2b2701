use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ValidationError;
use crate::table::{InteractionTable, INTERACTION, ITEM_ID, USER_ID};

/// Largest id that survives the round trip through an `f64` cell.
const MAX_EXACT_ID: f64 = 9_007_199_254_740_992.0; // 2^53

/// How repeated (user, item) pairs collapse into one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Последнее значение в порядке лога
    #[default]
    Last,
    Sum,
    /// Среднее по повторам (поведение pivot-таблиц)
    Mean,
    Max,
}

impl FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "last" => Ok(Aggregation::Last),
            "sum" => Ok(Aggregation::Sum),
            "mean" | "avg" => Ok(Aggregation::Mean),
            "max" => Ok(Aggregation::Max),
            other => Err(format!("unknown aggregation '{other}'")),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Aggregation::Last => "last",
            Aggregation::Sum => "sum",
            Aggregation::Mean => "mean",
            Aggregation::Max => "max",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy)]
struct CellAccumulator {
    last: f64,
    sum: f64,
    max: f64,
    count: usize,
}

impl CellAccumulator {
    fn new(value: f64) -> Self {
        Self {
            last: value,
            sum: value,
            max: value,
            count: 1,
        }
    }

    fn push(&mut self, value: f64) {
        self.last = value;
        self.sum += value;
        self.max = self.max.max(value);
        self.count += 1;
    }

    fn resolve(&self, aggregation: Aggregation) -> f64 {
        match aggregation {
            Aggregation::Last => self.last,
            Aggregation::Sum => self.sum,
            Aggregation::Mean => self.sum / self.count as f64,
            Aggregation::Max => self.max,
        }
    }
}

/// Dense user×item matrix plus the id↔index mappings that produced it.
///
/// Rows are distinct user ids and columns distinct item ids, both ascending.
/// Unobserved pairs are 0. The value is immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionMatrix {
    values: Array2<f64>,
    user_ids: Vec<u64>,
    item_ids: Vec<u64>,
    user_index: HashMap<u64, usize>,
    item_index: HashMap<u64, usize>,
    observed_pairs: usize,
}

impl InteractionMatrix {
    /// Build the matrix from a validated table.
    pub fn build(table: &InteractionTable, aggregation: Aggregation) -> Result<Self, ValidationError> {
        let user_col = table
            .column_index(USER_ID)
            .ok_or_else(|| ValidationError::MissingColumn(USER_ID.to_string()))?;
        let item_col = table
            .column_index(ITEM_ID)
            .ok_or_else(|| ValidationError::MissingColumn(ITEM_ID.to_string()))?;
        let value_col = table
            .column_index(INTERACTION)
            .ok_or_else(|| ValidationError::MissingColumn(INTERACTION.to_string()))?;
        if table.is_empty() {
            return Err(ValidationError::EmptyTable);
        }

        info!(rows = table.len(), %aggregation, "Building user-item interaction matrix");

        let mut cells: BTreeMap<(u64, u64), CellAccumulator> = BTreeMap::new();
        for (row_no, row) in table.rows().iter().enumerate() {
            let user = parse_id(row[user_col], USER_ID, row_no)?;
            let item = parse_id(row[item_col], ITEM_ID, row_no)?;
            let value = row[value_col];
            cells
                .entry((user, item))
                .and_modify(|acc| acc.push(value))
                .or_insert_with(|| CellAccumulator::new(value));
        }

        let user_ids: Vec<u64> = cells
            .keys()
            .map(|(u, _)| *u)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let item_ids: Vec<u64> = cells
            .keys()
            .map(|(_, i)| *i)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let user_index = index_of(&user_ids);
        let item_index = index_of(&item_ids);

        let mut values = Array2::<f64>::zeros((user_ids.len(), item_ids.len()));
        for ((user, item), acc) in &cells {
            values[[user_index[user], item_index[item]]] = acc.resolve(aggregation);
        }

        let duplicates = table.len() - cells.len();
        if duplicates > 0 {
            debug!(duplicates, %aggregation, "Collapsed duplicate user-item pairs");
        }

        let matrix = Self {
            values,
            user_ids,
            item_ids,
            user_index,
            item_index,
            observed_pairs: cells.len(),
        };
        info!(
            users = matrix.num_users(),
            items = matrix.num_items(),
            density = matrix.density(),
            "Interaction matrix successfully built"
        );
        Ok(matrix)
    }

    /// Reassemble a matrix from persisted parts (ids ascending, shape matching).
    pub fn from_parts(
        user_ids: Vec<u64>,
        item_ids: Vec<u64>,
        values: Array2<f64>,
    ) -> Result<Self, ValidationError> {
        if values.dim() != (user_ids.len(), item_ids.len()) {
            return Err(ValidationError::Inconsistent(format!(
                "values are {:?}, ids describe {}x{}",
                values.dim(),
                user_ids.len(),
                item_ids.len()
            )));
        }
        if !is_strictly_ascending(&user_ids) || !is_strictly_ascending(&item_ids) {
            return Err(ValidationError::Inconsistent(
                "ids must be unique and ascending".to_string(),
            ));
        }
        let observed_pairs = values.iter().filter(|v| **v != 0.0).count();
        Ok(Self {
            user_index: index_of(&user_ids),
            item_index: index_of(&item_ids),
            values,
            user_ids,
            item_ids,
            observed_pairs,
        })
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn shape(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn num_users(&self) -> usize {
        self.user_ids.len()
    }

    pub fn num_items(&self) -> usize {
        self.item_ids.len()
    }

    pub fn user_ids(&self) -> &[u64] {
        &self.user_ids
    }

    pub fn item_ids(&self) -> &[u64] {
        &self.item_ids
    }

    pub fn user_index(&self, user_id: u64) -> Option<usize> {
        self.user_index.get(&user_id).copied()
    }

    pub fn item_index(&self, item_id: u64) -> Option<usize> {
        self.item_index.get(&item_id).copied()
    }

    pub fn user_id(&self, index: usize) -> Option<u64> {
        self.user_ids.get(index).copied()
    }

    pub fn item_id(&self, index: usize) -> Option<u64> {
        self.item_ids.get(index).copied()
    }

    /// Aggregated value for a pair of raw ids; `None` when either id is unknown.
    pub fn get(&self, user_id: u64, item_id: u64) -> Option<f64> {
        let row = self.user_index(user_id)?;
        let col = self.item_index(item_id)?;
        Some(self.values[[row, col]])
    }

    /// Distinct (user, item) pairs present in the log.
    ///
    /// After [`InteractionMatrix::from_parts`] only non-zero cells can be counted.
    pub fn nnz(&self) -> usize {
        self.observed_pairs
    }

    pub fn density(&self) -> f64 {
        let cells = self.values.len();
        if cells == 0 {
            0.0
        } else {
            self.observed_pairs as f64 / cells as f64
        }
    }
}

fn parse_id(value: f64, column: &str, row: usize) -> Result<u64, ValidationError> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= MAX_EXACT_ID {
        Ok(value as u64)
    } else {
        Err(ValidationError::InvalidId {
            column: column.to_string(),
            row,
            value,
        })
    }
}

fn index_of(ids: &[u64]) -> HashMap<u64, usize> {
    ids.iter().enumerate().map(|(i, id)| (*id, i)).collect()
}

fn is_strictly_ascending(ids: &[u64]) -> bool {
    ids.windows(2).all(|w| w[0] < w[1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_identity_log() {
        let table = InteractionTable::from_triples(&[(0, 0, 1.0), (0, 1, 0.0), (1, 0, 0.0), (1, 1, 1.0)]);
        let matrix = InteractionMatrix::build(&table, Aggregation::Last).unwrap();
        assert_eq!(matrix.shape(), (2, 2));
        assert_eq!(matrix.values(), &array![[1.0, 0.0], [0.0, 1.0]]);
        assert_eq!(matrix.nnz(), 4);
    }

    #[test]
    fn test_sparse_ids_are_sorted_and_zero_filled() {
        let table = InteractionTable::from_triples(&[(42, 7, 1.0), (3, 100, 2.0), (42, 100, 5.0)]);
        let matrix = InteractionMatrix::build(&table, Aggregation::Last).unwrap();

        assert_eq!(matrix.user_ids(), &[3, 42]);
        assert_eq!(matrix.item_ids(), &[7, 100]);
        assert_eq!(matrix.get(3, 7), Some(0.0));
        assert_eq!(matrix.get(3, 100), Some(2.0));
        assert_eq!(matrix.get(42, 7), Some(1.0));
        assert_eq!(matrix.get(42, 100), Some(5.0));
        assert_eq!(matrix.get(1, 7), None);
        assert_eq!(matrix.user_index(42), Some(1));
        assert_eq!(matrix.item_id(0), Some(7));
        assert!((matrix.density() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_duplicate_aggregation_policies() {
        let table = InteractionTable::from_triples(&[(0, 0, 1.0), (0, 0, 3.0), (0, 0, 2.0)]);
        let value = |agg| {
            InteractionMatrix::build(&table, agg)
                .unwrap()
                .get(0, 0)
                .unwrap()
        };
        assert_eq!(value(Aggregation::Last), 2.0);
        assert_eq!(value(Aggregation::Sum), 6.0);
        assert_eq!(value(Aggregation::Mean), 2.0);
        assert_eq!(value(Aggregation::Max), 3.0);
    }

    #[test]
    fn test_missing_column_and_empty_table() {
        let table = InteractionTable::from_triples(&[(0, 0, 1.0)]).without_column(INTERACTION);
        assert!(matches!(
            InteractionMatrix::build(&table, Aggregation::Last),
            Err(ValidationError::MissingColumn(c)) if c == "interaction"
        ));

        let empty = InteractionTable::from_triples(&[]);
        assert!(matches!(
            InteractionMatrix::build(&empty, Aggregation::Last),
            Err(ValidationError::EmptyTable)
        ));
    }

    #[test]
    fn test_invalid_ids_rejected() {
        let mut table = InteractionTable::new(vec!["user_id".into(), "item_id".into(), "interaction".into()]);
        table.push_row(vec![-1.0, 0.0, 1.0]).unwrap();
        assert!(matches!(
            InteractionMatrix::build(&table, Aggregation::Last),
            Err(ValidationError::InvalidId { row: 0, .. })
        ));

        let mut table = InteractionTable::new(vec!["user_id".into(), "item_id".into(), "interaction".into()]);
        table.push_row(vec![0.0, 1.5, 1.0]).unwrap();
        assert!(matches!(
            InteractionMatrix::build(&table, Aggregation::Last),
            Err(ValidationError::InvalidId { .. })
        ));
    }

    #[test]
    fn test_from_parts_roundtrip_and_checks() {
        let table = InteractionTable::from_triples(&[(1, 2, 1.0), (5, 9, 1.0)]);
        let built = InteractionMatrix::build(&table, Aggregation::Last).unwrap();
        let rebuilt = InteractionMatrix::from_parts(
            built.user_ids().to_vec(),
            built.item_ids().to_vec(),
            built.values().clone(),
        )
        .unwrap();
        assert_eq!(rebuilt, built);

        assert!(InteractionMatrix::from_parts(vec![1], vec![2, 3], Array2::zeros((2, 2))).is_err());
        assert!(InteractionMatrix::from_parts(vec![3, 1], vec![2, 3], Array2::zeros((2, 2))).is_err());
    }

    #[test]
    fn test_aggregation_parse() {
        assert_eq!("SUM".parse::<Aggregation>(), Ok(Aggregation::Sum));
        assert_eq!("avg".parse::<Aggregation>(), Ok(Aggregation::Mean));
        assert!("median".parse::<Aggregation>().is_err());
    }
}
