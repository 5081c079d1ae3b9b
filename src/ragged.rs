// A deliberately minimal stand-in for the external ragged-tensor primitive
// library the real engine depends on (SPEC_FULL.md §2, component 1). It
// covers exactly the operations the rest of this crate needs: row-splits /
// row-ids conversion, renumbering via a keep-mask, exclusive-sum,
// max-per-sublist, and stacking along an axis with a merge-map. It is not
// a general tensor library and makes no attempt to be one.

/// The shape of one ragged axis: `row_splits[i]..row_splits[i+1]` gives the
/// element range for row `i`. `row_ids[k] == i` iff that range contains `k`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaggedShape {
    row_splits: Vec<i32>,
    row_ids: Vec<i32>,
}

impl RaggedShape {
    pub fn from_row_splits(row_splits: Vec<i32>) -> Self {
        debug_assert!(!row_splits.is_empty(), "row_splits must contain at least 0");
        debug_assert_eq!(row_splits[0], 0);
        debug_assert!(row_splits.windows(2).all(|w| w[0] <= w[1]));
        let row_ids = row_ids_from_row_splits(&row_splits);
        RaggedShape {
            row_splits,
            row_ids,
        }
    }

    pub fn from_row_ids(row_ids: Vec<i32>, num_rows: i32) -> Self {
        let row_splits = row_splits_from_row_ids(&row_ids, num_rows);
        RaggedShape {
            row_splits,
            row_ids,
        }
    }

    /// A shape with `num_rows` empty rows.
    pub fn empty(num_rows: usize) -> Self {
        RaggedShape {
            row_splits: vec![0; num_rows + 1],
            row_ids: Vec::new(),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.row_splits.len() - 1
    }

    pub fn num_elements(&self) -> usize {
        *self.row_splits.last().unwrap() as usize
    }

    pub fn row_splits(&self) -> &[i32] {
        &self.row_splits
    }

    pub fn row_ids(&self) -> &[i32] {
        &self.row_ids
    }

    /// The `[start, end)` element range belonging to `row`.
    pub fn row_range(&self, row: usize) -> std::ops::Range<usize> {
        self.row_splits[row] as usize..self.row_splits[row + 1] as usize
    }

    pub fn row_len(&self, row: usize) -> usize {
        self.row_range(row).len()
    }

    /// The row an element belongs to.
    pub fn row_of(&self, elem: usize) -> i32 {
        self.row_ids[elem]
    }
}

fn row_ids_from_row_splits(row_splits: &[i32]) -> Vec<i32> {
    let total = *row_splits.last().unwrap() as usize;
    let mut row_ids = Vec::with_capacity(total);
    for row in 0..row_splits.len() - 1 {
        let len = (row_splits[row + 1] - row_splits[row]) as usize;
        row_ids.extend(std::iter::repeat(row as i32).take(len));
    }
    row_ids
}

fn row_splits_from_row_ids(row_ids: &[i32], num_rows: i32) -> Vec<i32> {
    let mut row_splits = vec![0i32; num_rows as usize + 1];
    for &row in row_ids {
        row_splits[row as usize + 1] += 1;
    }
    for i in 1..row_splits.len() {
        row_splits[i] += row_splits[i - 1];
    }
    row_splits
}

/// Prefix sum with a leading zero: `out[i] = sum(counts[0..i])`, so
/// `out.len() == counts.len() + 1` and `out` is a valid row-splits array
/// when `counts` are per-row element counts.
pub fn exclusive_sum(counts: &[i32]) -> Vec<i32> {
    let mut out = Vec::with_capacity(counts.len() + 1);
    let mut acc = 0i32;
    out.push(0);
    for &c in counts {
        acc += c;
        out.push(acc);
    }
    out
}

/// The maximum value per row, or `default` for empty rows.
pub fn max_per_sublist(shape: &RaggedShape, values: &[f32], default: f32) -> Vec<f32> {
    let mut out = vec![default; shape.num_rows()];
    for row in 0..shape.num_rows() {
        let range = shape.row_range(row);
        if range.is_empty() {
            continue;
        }
        out[row] = values[range]
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
    }
    out
}

/// A paired ragged shape and its values: axis `i` is `values[row_range(i)]`.
#[derive(Debug, Clone)]
pub struct Ragged<T> {
    pub shape: RaggedShape,
    pub values: Vec<T>,
}

impl<T> Ragged<T> {
    pub fn new(shape: RaggedShape, values: Vec<T>) -> Self {
        debug_assert_eq!(shape.num_elements(), values.len());
        Ragged { shape, values }
    }

    pub fn row(&self, row: usize) -> &[T] {
        &self.values[self.shape.row_range(row)]
    }

    pub fn num_rows(&self) -> usize {
        self.shape.num_rows()
    }
}

impl<T: Clone> Ragged<T> {
    /// Drop elements where `keep[i]` is false, recomputing row splits.
    /// Returns the renumbered ragged tensor plus an `old -> new` index map
    /// with `-1` for dropped elements.
    pub fn renumber(&self, keep: &[bool]) -> (Ragged<T>, Vec<i32>) {
        debug_assert_eq!(keep.len(), self.values.len());
        let mut old_to_new = vec![-1i32; self.values.len()];
        let mut new_values = Vec::new();
        let mut counts = vec![0i32; self.shape.num_rows()];
        for row in 0..self.shape.num_rows() {
            for idx in self.shape.row_range(row) {
                if keep[idx] {
                    old_to_new[idx] = new_values.len() as i32;
                    new_values.push(self.values[idx].clone());
                    counts[row] += 1;
                }
            }
        }
        let new_shape = RaggedShape::from_row_splits(exclusive_sum(&counts));
        (Ragged::new(new_shape, new_values), old_to_new)
    }
}

/// Records, for each element of a stacked shape, which input layer it came
/// from and its index within that layer: `origin_layer[k] = t`,
/// `origin_idx[k]` = index of element `k` within layer `t`'s own values.
#[derive(Debug, Clone, Default)]
pub struct MergeMap {
    pub origin_layer: Vec<i32>,
    pub origin_idx: Vec<i32>,
}

/// Stack ragged tensors that share the same row structure along a new
/// leading "layer" axis, producing one flat tensor plus a merge-map.
/// This is the same operation `FrameStore`/`Assembler` uses to flatten the
/// per-frame tables into a single 4-axis lattice.
pub fn stack_layers<T: Clone>(layers: &[Ragged<T>]) -> (Vec<T>, MergeMap) {
    let total: usize = layers.iter().map(|l| l.values.len()).sum();
    let mut values = Vec::with_capacity(total);
    let mut merge = MergeMap {
        origin_layer: Vec::with_capacity(total),
        origin_idx: Vec::with_capacity(total),
    };
    for (t, layer) in layers.iter().enumerate() {
        for (idx, v) in layer.values.iter().enumerate() {
            values.push(v.clone());
            merge.origin_layer.push(t as i32);
            merge.origin_idx.push(idx as i32);
        }
    }
    (values, merge)
}
