use rustc_hash::FxHashMap;
use std::hash::Hash;

fn index_right<'a, R, K, FR>(right: &'a [R], right_key: FR) -> FxHashMap<K, Vec<&'a R>>
where
    K: Eq + Hash,
    FR: Fn(&R) -> Option<K>,
{
    let mut index: FxHashMap<K, Vec<&'a R>> = FxHashMap::default();
    for row in right {
        if let Some(key) = right_key(row) {
            index.entry(key).or_default().push(row);
        }
    }
    index
}

/// Joins `left` to `right` keeping every left row. A left row with a null
/// key or no match appears once with `None`; a left row with several
/// matches appears once per match. Output follows the left order.
pub fn left_join<'a, L, R, K, FL, FR>(
    left: &'a [L],
    right: &'a [R],
    left_key: FL,
    right_key: FR,
) -> Vec<(&'a L, Option<&'a R>)>
where
    K: Eq + Hash,
    FL: Fn(&L) -> Option<K>,
    FR: Fn(&R) -> Option<K>,
{
    let index = index_right(right, right_key);
    let mut joined = Vec::with_capacity(left.len());

    for row in left {
        match left_key(row).and_then(|k| index.get(&k)) {
            Some(matches) => joined.extend(matches.iter().map(|m| (row, Some(*m)))),
            None => joined.push((row, None)),
        }
    }
    joined
}

/// Joins `left` to `right` keeping only matched pairs.
pub fn inner_join<'a, L, R, K, FL, FR>(
    left: &'a [L],
    right: &'a [R],
    left_key: FL,
    right_key: FR,
) -> Vec<(&'a L, &'a R)>
where
    K: Eq + Hash,
    FL: Fn(&L) -> Option<K>,
    FR: Fn(&R) -> Option<K>,
{
    let index = index_right(right, right_key);
    let mut joined = Vec::new();

    for row in left {
        if let Some(matches) = left_key(row).and_then(|k| index.get(&k)) {
            joined.extend(matches.iter().map(|m| (row, *m)));
        }
    }
    joined
}
