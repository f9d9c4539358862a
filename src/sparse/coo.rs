use crate::error::UmapError;
use serde::Deserialize;
use serde::Serialize;
use sprs::CsMat;
use sprs::CsMatView;
use sprs::TriMat;

/// Coordinate-form sparse matrix.
///
/// Entries are kept sorted lexicographically by `(row, col)` with no
/// duplicate coordinates, which makes `get` a binary search and lets the
/// symmetric combinators walk the storage directly. Instances are immutable;
/// every operation returns a fresh matrix. Explicit zeros introduced by
/// arithmetic are retained until [`CooMatrix::eliminate_zeros`] prunes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CooMatrix {
  rows: usize,
  cols: usize,
  row: Vec<u32>,
  col: Vec<u32>,
  data: Vec<f32>,
}

impl CooMatrix {
  /// Build a matrix from triplet arrays, sorting them into canonical order.
  ///
  /// Fails on out-of-range coordinates, mismatched array lengths, or
  /// duplicate `(row, col)` pairs.
  pub fn from_triplets(
    shape: (usize, usize),
    row: Vec<u32>,
    col: Vec<u32>,
    data: Vec<f32>,
  ) -> Result<Self, UmapError> {
    if row.len() != col.len() || row.len() != data.len() {
      return Err(UmapError::ShapeMismatch(format!(
        "triplet arrays have lengths {}, {}, {}",
        row.len(),
        col.len(),
        data.len()
      )));
    }
    for &r in &row {
      if r as usize >= shape.0 {
        return Err(UmapError::ShapeMismatch(format!(
          "row index {r} out of bounds for {} rows",
          shape.0
        )));
      }
    }
    for &c in &col {
      if c as usize >= shape.1 {
        return Err(UmapError::ShapeMismatch(format!(
          "column index {c} out of bounds for {} columns",
          shape.1
        )));
      }
    }

    let mut order: Vec<usize> = (0..row.len()).collect();
    order.sort_unstable_by_key(|&k| (row[k], col[k]));

    let mut sorted_row = Vec::with_capacity(row.len());
    let mut sorted_col = Vec::with_capacity(col.len());
    let mut sorted_data = Vec::with_capacity(data.len());
    for &k in &order {
      sorted_row.push(row[k]);
      sorted_col.push(col[k]);
      sorted_data.push(data[k]);
    }

    for k in 1..sorted_row.len() {
      if sorted_row[k] == sorted_row[k - 1] && sorted_col[k] == sorted_col[k - 1] {
        return Err(UmapError::Config(format!(
          "duplicate entry at ({}, {})",
          sorted_row[k], sorted_col[k]
        )));
      }
    }

    Ok(Self {
      rows: shape.0,
      cols: shape.1,
      row: sorted_row,
      col: sorted_col,
      data: sorted_data,
    })
  }

  pub fn shape(&self) -> (usize, usize) {
    (self.rows, self.cols)
  }

  pub fn rows(&self) -> usize {
    self.rows
  }

  pub fn cols(&self) -> usize {
    self.cols
  }

  /// Number of stored entries, explicit zeros included.
  pub fn nnz(&self) -> usize {
    self.data.len()
  }

  /// Iterate stored entries in canonical order.
  pub fn triplets(&self) -> impl Iterator<Item = (u32, u32, f32)> + '_ {
    (0..self.data.len()).map(move |k| (self.row[k], self.col[k], self.data[k]))
  }

  /// Position of `(r, c)` in the storage, if present.
  fn position(&self, r: u32, c: u32) -> Option<usize> {
    let mut lo = 0usize;
    let mut hi = self.data.len();
    while lo < hi {
      let mid = (lo + hi) / 2;
      match (self.row[mid], self.col[mid]).cmp(&(r, c)) {
        std::cmp::Ordering::Equal => return Some(mid),
        std::cmp::Ordering::Less => lo = mid + 1,
        std::cmp::Ordering::Greater => hi = mid,
      }
    }
    None
  }

  /// Value at `(r, c)`; absent entries read as zero.
  pub fn get(&self, r: usize, c: usize) -> f32 {
    match self.position(r as u32, c as u32) {
      Some(k) => self.data[k],
      None => 0.0,
    }
  }

  /// Fresh matrix with rows and columns exchanged.
  pub fn transpose(&self) -> Self {
    // from_triplets re-sorts; invariants carry over from self
    Self::from_triplets(
      (self.cols, self.rows),
      self.col.clone(),
      self.row.clone(),
      self.data.clone(),
    )
    .expect("transpose of a valid matrix is valid")
  }

  /// Drop explicitly stored zeros. The only place they are pruned.
  pub fn eliminate_zeros(&self) -> Self {
    let mut row = Vec::with_capacity(self.data.len());
    let mut col = Vec::with_capacity(self.data.len());
    let mut data = Vec::with_capacity(self.data.len());
    for k in 0..self.data.len() {
      if self.data[k] != 0.0 {
        row.push(self.row[k]);
        col.push(self.col[k]);
        data.push(self.data[k]);
      }
    }
    Self {
      rows: self.rows,
      cols: self.cols,
      row,
      col,
      data,
    }
  }

  /// Multiply every stored entry by a scalar.
  pub fn scale(&self, x: f32) -> Self {
    let mut out = self.clone();
    for v in &mut out.data {
      *v *= x;
    }
    out
  }

  /// Replace each stored value through `f(row, col, value)`.
  pub fn map_data(&self, f: impl Fn(u32, u32, f32) -> f32) -> Self {
    let mut out = self.clone();
    for k in 0..out.data.len() {
      out.data[k] = f(out.row[k], out.col[k], out.data[k]);
    }
    out
  }

  fn check_same_shape(&self, other: &Self) -> Result<(), UmapError> {
    if self.shape() != other.shape() {
      return Err(UmapError::ShapeMismatch(format!(
        "{:?} vs {:?}",
        self.shape(),
        other.shape()
      )));
    }
    Ok(())
  }

  /// Merge two canonically sorted matrices over the union of their supports.
  fn merge_union(&self, other: &Self, f: impl Fn(f32, f32) -> f32) -> Self {
    let mut row = Vec::with_capacity(self.nnz() + other.nnz());
    let mut col = Vec::with_capacity(self.nnz() + other.nnz());
    let mut data = Vec::with_capacity(self.nnz() + other.nnz());

    let mut a = 0usize;
    let mut b = 0usize;
    while a < self.nnz() || b < other.nnz() {
      let key_a = if a < self.nnz() {
        Some((self.row[a], self.col[a]))
      } else {
        None
      };
      let key_b = if b < other.nnz() {
        Some((other.row[b], other.col[b]))
      } else {
        None
      };
      match (key_a, key_b) {
        (Some(ka), Some(kb)) if ka == kb => {
          row.push(ka.0);
          col.push(ka.1);
          data.push(f(self.data[a], other.data[b]));
          a += 1;
          b += 1;
        }
        (Some(ka), Some(kb)) if ka < kb => {
          row.push(ka.0);
          col.push(ka.1);
          data.push(f(self.data[a], 0.0));
          a += 1;
        }
        (Some(_), Some(kb)) => {
          row.push(kb.0);
          col.push(kb.1);
          data.push(f(0.0, other.data[b]));
          b += 1;
        }
        (Some(ka), None) => {
          row.push(ka.0);
          col.push(ka.1);
          data.push(f(self.data[a], 0.0));
          a += 1;
        }
        (None, Some(kb)) => {
          row.push(kb.0);
          col.push(kb.1);
          data.push(f(0.0, other.data[b]));
          b += 1;
        }
        (None, None) => unreachable!(),
      }
    }

    Self {
      rows: self.rows,
      cols: self.cols,
      row,
      col,
      data,
    }
  }

  /// Elementwise sum.
  pub fn add(&self, other: &Self) -> Result<Self, UmapError> {
    self.check_same_shape(other)?;
    Ok(self.merge_union(other, |a, b| a + b))
  }

  /// Elementwise difference.
  pub fn subtract(&self, other: &Self) -> Result<Self, UmapError> {
    self.check_same_shape(other)?;
    Ok(self.merge_union(other, |a, b| a - b))
  }

  /// Elementwise maximum over the union of supports.
  pub fn maximum(&self, other: &Self) -> Result<Self, UmapError> {
    self.check_same_shape(other)?;
    Ok(self.merge_union(other, f32::max))
  }

  /// Hadamard (elementwise) product. The support is the intersection of the
  /// operand supports.
  pub fn hadamard(&self, other: &Self) -> Result<Self, UmapError> {
    self.check_same_shape(other)?;
    let mut row = Vec::new();
    let mut col = Vec::new();
    let mut data = Vec::new();
    let mut a = 0usize;
    let mut b = 0usize;
    while a < self.nnz() && b < other.nnz() {
      let ka = (self.row[a], self.col[a]);
      let kb = (other.row[b], other.col[b]);
      match ka.cmp(&kb) {
        std::cmp::Ordering::Equal => {
          row.push(ka.0);
          col.push(ka.1);
          data.push(self.data[a] * other.data[b]);
          a += 1;
          b += 1;
        }
        std::cmp::Ordering::Less => a += 1,
        std::cmp::Ordering::Greater => b += 1,
      }
    }
    Ok(Self {
      rows: self.rows,
      cols: self.cols,
      row,
      col,
      data,
    })
  }

  fn check_square(&self) -> Result<(), UmapError> {
    if self.rows != self.cols {
      return Err(UmapError::ShapeMismatch(format!(
        "symmetric combinator requires a square matrix, got {:?}",
        self.shape()
      )));
    }
    Ok(())
  }

  /// `A + Aᵀ`, computed on the sparse storage.
  ///
  /// The result support is `support(A) ∪ support(Aᵀ)`, at most twice the
  /// input size.
  pub fn add_transpose(&self) -> Result<Self, UmapError> {
    self.check_square()?;
    let mut row = Vec::with_capacity(2 * self.nnz());
    let mut col = Vec::with_capacity(2 * self.nnz());
    let mut data = Vec::with_capacity(2 * self.nnz());
    for k in 0..self.nnz() {
      let (r, c, v) = (self.row[k], self.col[k], self.data[k]);
      match self.position(c, r) {
        Some(m) => {
          row.push(r);
          col.push(c);
          data.push(v + self.data[m]);
        }
        None => {
          // mirror position is absent: this entry contributes at both
          // (r, c) and (c, r)
          row.push(r);
          col.push(c);
          data.push(v);
          row.push(c);
          col.push(r);
          data.push(v);
        }
      }
    }
    Self::from_triplets((self.rows, self.cols), row, col, data)
  }

  /// `A ∘ Aᵀ`, computed on the sparse storage.
  ///
  /// The result support is `support(A) ∩ support(Aᵀ)`, never larger than
  /// the input.
  pub fn hadamard_transpose(&self) -> Result<Self, UmapError> {
    self.check_square()?;
    let mut row = Vec::with_capacity(self.nnz());
    let mut col = Vec::with_capacity(self.nnz());
    let mut data = Vec::with_capacity(self.nnz());
    for k in 0..self.nnz() {
      let (r, c, v) = (self.row[k], self.col[k], self.data[k]);
      if let Some(m) = self.position(c, r) {
        row.push(r);
        col.push(c);
        data.push(v * self.data[m]);
      }
    }
    Ok(Self {
      rows: self.rows,
      cols: self.cols,
      row,
      col,
      data,
    })
  }

  /// Divide each row by its maximum stored value.
  pub fn row_normalize(&self) -> Self {
    self.row_scaled(|values| {
      values
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max)
    })
  }

  /// Divide each row by the sum of its absolute values.
  pub fn row_normalize_l1(&self) -> Self {
    self.row_scaled(|values| values.iter().map(|v| v.abs()).sum())
  }

  fn row_scaled(&self, norm: impl Fn(&[f32]) -> f32) -> Self {
    let mut out = self.clone();
    let mut start = 0usize;
    while start < out.data.len() {
      let r = out.row[start];
      let mut end = start;
      while end < out.data.len() && out.row[end] == r {
        end += 1;
      }
      let scale = norm(&out.data[start..end]);
      if scale != 0.0 {
        for v in &mut out.data[start..end] {
          *v /= scale;
        }
      }
      start = end;
    }
    out
  }

  /// Convert to compressed-row form.
  pub fn to_csr(&self) -> CsMat<f32> {
    let mut tri = TriMat::with_capacity((self.rows, self.cols), self.nnz());
    for k in 0..self.nnz() {
      tri.add_triplet(self.row[k] as usize, self.col[k] as usize, self.data[k]);
    }
    tri.to_csr()
  }

  /// Build from compressed-row form.
  pub fn from_csr(mat: CsMatView<f32>) -> Self {
    let mut row = Vec::with_capacity(mat.nnz());
    let mut col = Vec::with_capacity(mat.nnz());
    let mut data = Vec::with_capacity(mat.nnz());
    for (&v, (r, c)) in mat.iter() {
      row.push(r as u32);
      col.push(c as u32);
      data.push(v);
    }
    Self::from_triplets(mat.shape(), row, col, data)
      .expect("CSR matrices have unique in-range coordinates")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> CooMatrix {
    // [[1, 0, 2],
    //  [0, 3, 0],
    //  [4, 0, 0]]
    CooMatrix::from_triplets(
      (3, 3),
      vec![2, 0, 1, 0],
      vec![0, 0, 1, 2],
      vec![4.0, 1.0, 3.0, 2.0],
    )
    .unwrap()
  }

  #[test]
  fn construction_sorts_canonically() {
    let m = sample();
    let entries: Vec<_> = m.triplets().collect();
    assert_eq!(
      entries,
      vec![(0, 0, 1.0), (0, 2, 2.0), (1, 1, 3.0), (2, 0, 4.0)]
    );
    for w in entries.windows(2) {
      assert!((w[0].0, w[0].1) < (w[1].0, w[1].1));
    }
  }

  #[test]
  fn duplicates_and_bounds_are_rejected() {
    assert!(CooMatrix::from_triplets(
      (2, 2),
      vec![0, 0],
      vec![1, 1],
      vec![1.0, 2.0]
    )
    .is_err());
    assert!(CooMatrix::from_triplets((2, 2), vec![2], vec![0], vec![1.0]).is_err());
    assert!(CooMatrix::from_triplets((2, 2), vec![0], vec![5], vec![1.0]).is_err());
  }

  #[test]
  fn get_reads_through_binary_search() {
    let m = sample();
    assert_eq!(m.get(0, 0), 1.0);
    assert_eq!(m.get(0, 2), 2.0);
    assert_eq!(m.get(1, 1), 3.0);
    assert_eq!(m.get(2, 0), 4.0);
    assert_eq!(m.get(2, 2), 0.0);
  }

  #[test]
  fn transpose_and_roundtrip() {
    let m = sample();
    let t = m.transpose();
    assert_eq!(t.get(0, 2), 4.0);
    assert_eq!(t.get(2, 0), 2.0);
    assert_eq!(t.transpose(), m);

    let csr = m.to_csr();
    assert_eq!(CooMatrix::from_csr(csr.view()), m);
  }

  #[test]
  fn arithmetic_and_zero_elimination() {
    let m = sample();
    let diff = m.subtract(&m).unwrap();
    // subtraction leaves explicit zeros behind
    assert_eq!(diff.nnz(), m.nnz());
    assert_eq!(diff.eliminate_zeros().nnz(), 0);

    let doubled = m.add(&m).unwrap();
    assert_eq!(doubled.get(2, 0), 8.0);
    assert_eq!(doubled.nnz(), m.nnz());

    let squared = m.hadamard(&m).unwrap();
    assert_eq!(squared.get(0, 2), 4.0);

    assert_eq!(m.scale(0.5).get(1, 1), 1.5);
  }

  #[test]
  fn symmetric_combinators_bound_sparsity() {
    let m = sample();
    let sum = m.add_transpose().unwrap();
    let prod = m.hadamard_transpose().unwrap();
    assert!(prod.nnz() <= m.nnz());
    assert!(sum.nnz() <= 2 * m.nnz());
    // (0, 2) + (2, 0) overlap
    assert_eq!(sum.get(0, 2), 6.0);
    assert_eq!(sum.get(2, 0), 6.0);
    assert_eq!(sum.get(0, 0), 2.0);
    assert_eq!(prod.get(0, 2), 8.0);
    assert_eq!(prod.get(2, 0), 8.0);
    // (1, 1) is on the diagonal, so it survives the intersection
    assert_eq!(prod.get(1, 1), 9.0);
    // canonical order must hold on combinator output
    let entries: Vec<_> = sum.triplets().collect();
    for w in entries.windows(2) {
      assert!((w[0].0, w[0].1) < (w[1].0, w[1].1));
    }
  }

  #[test]
  fn maximum_takes_the_union() {
    let m = sample();
    let t = m.transpose();
    let sym = m.maximum(&t).unwrap();
    assert_eq!(sym.get(0, 2), 4.0);
    assert_eq!(sym.get(2, 0), 4.0);
    assert_eq!(sym.get(1, 1), 3.0);
  }

  #[test]
  fn row_normalization_divides_by_max() {
    let m = sample();
    let normalized = m.row_normalize();
    assert_eq!(normalized.get(0, 0), 0.5);
    assert_eq!(normalized.get(0, 2), 1.0);
    assert_eq!(normalized.get(1, 1), 1.0);
    assert_eq!(normalized.get(2, 0), 1.0);

    let l1 = m.row_normalize_l1();
    assert!((l1.get(0, 0) - 1.0 / 3.0).abs() < 1e-6);
    assert!((l1.get(0, 2) - 2.0 / 3.0).abs() < 1e-6);
  }
}
