//! Cross-product helper
//!
//! Builds every combination of named value sequences, one record per
//! combination, ready for [`Plan::add_argset_from_list`](crate::Plan::add_argset_from_list).

use crate::table::Fields;
use indexmap::IndexMap;
use serde_json::Value;

/// Every combination of the named sequences, last input varying fastest
///
/// An empty input yields a single empty record; any empty sequence yields
/// no records.
#[must_use]
pub fn expand(inputs: &IndexMap<String, Vec<Value>>) -> Vec<Fields> {
    let total: usize = inputs.values().map(Vec::len).product();
    let mut out = Vec::with_capacity(total);
    if total == 0 {
        return out;
    }

    let keys: Vec<&String> = inputs.keys().collect();
    let lists: Vec<&Vec<Value>> = inputs.values().collect();
    let mut cursor = vec![0usize; lists.len()];

    loop {
        let record: Fields = keys
            .iter()
            .zip(&lists)
            .zip(&cursor)
            .map(|((k, list), &i)| ((*k).clone(), list[i].clone()))
            .collect();
        out.push(record);

        // odometer increment, rightmost position first
        let mut pos = lists.len();
        loop {
            if pos == 0 {
                return out;
            }
            pos -= 1;
            cursor[pos] += 1;
            if cursor[pos] < lists[pos].len() {
                break;
            }
            cursor[pos] = 0;
        }
    }
}

/// Build [`expand`] input from `key => [values]` pairs and expand it
///
/// ```
/// let combos = plnr_core::expand!("a" => [1, 2], "b" => ["x", "y"]);
/// assert_eq!(combos.len(), 4);
/// ```
#[macro_export]
macro_rules! expand {
    ($($key:expr => [$($value:expr),* $(,)?]),* $(,)?) => {{
        let mut inputs = $crate::__private::IndexMap::<
            ::std::string::String,
            ::std::vec::Vec<$crate::__private::Value>,
        >::new();
        $(
            inputs.insert(
                ::std::string::String::from($key),
                ::std::vec![$($crate::__private::json!($value)),*],
            );
        )*
        $crate::expand::expand(&inputs)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn two_by_two_order() {
        let combos = crate::expand!("a" => [1, 2], "b" => ["x", "y"]);
        let flat: Vec<(Value, Value)> = combos
            .iter()
            .map(|c| (c["a"].clone(), c["b"].clone()))
            .collect();
        assert_eq!(
            flat,
            vec![
                (json!(1), json!("x")),
                (json!(1), json!("y")),
                (json!(2), json!("x")),
                (json!(2), json!("y")),
            ]
        );
    }

    #[test]
    fn key_order_preserved() {
        let combos = crate::expand!("z" => [1], "a" => [2]);
        let keys: Vec<_> = combos[0].keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[test]
    fn empty_input_single_record() {
        let combos = expand(&IndexMap::new());
        assert_eq!(combos.len(), 1);
        assert!(combos[0].is_empty());
    }

    #[test]
    fn empty_sequence_no_records() {
        let mut inputs = IndexMap::new();
        inputs.insert("a".to_string(), vec![json!(1)]);
        inputs.insert("b".to_string(), Vec::new());
        assert!(expand(&inputs).is_empty());
    }

    #[test]
    fn three_inputs_cardinality() {
        let combos = crate::expand!("a" => [1, 2, 3], "b" => [true, false], "c" => ["p", "q"]);
        assert_eq!(combos.len(), 12);
        assert_eq!(combos[11]["a"], json!(3));
        assert_eq!(combos[11]["c"], json!("q"));
    }
}
