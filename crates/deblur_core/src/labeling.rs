//! Connected-component labeling over the support of an image.
//!
//! Two-pass 8-connected labeling: the first scan assigns provisional labels
//! and records equivalences in a union-find forest, the second scan resolves
//! roots and renumbers components compactly from 1 (0 is background).

use ndarray::{Array2, ArrayView2};

use crate::float_trait::DeblurFloat;

/// Iterative union-find root lookup with path compression.
fn find(parent: &mut [usize], start: usize) -> usize {
    let mut root = start;
    while parent[root] != root {
        root = parent[root];
    }
    let mut node = start;
    while parent[node] != root {
        let next = parent[node];
        parent[node] = root;
        node = next;
    }
    root
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parent[hi] = lo;
    }
}

/// Label the 8-connected components of the non-zero support of `img`.
///
/// Returns the label image (0 for background, 1..=count for components)
/// and the number of components.
pub fn label_components<F: DeblurFloat>(img: ArrayView2<F>) -> (Array2<usize>, usize) {
    let (height, width) = img.dim();
    let mut labels = Array2::<usize>::zeros((height, width));
    let mut parent: Vec<usize> = vec![0];

    for y in 0..height {
        for x in 0..width {
            if img[[y, x]] == F::zero() {
                continue;
            }

            let mut neighbors = [0usize; 4];
            let mut count = 0;
            if y > 0 && x > 0 && labels[[y - 1, x - 1]] != 0 {
                neighbors[count] = labels[[y - 1, x - 1]];
                count += 1;
            }
            if y > 0 && labels[[y - 1, x]] != 0 {
                neighbors[count] = labels[[y - 1, x]];
                count += 1;
            }
            if y > 0 && x + 1 < width && labels[[y - 1, x + 1]] != 0 {
                neighbors[count] = labels[[y - 1, x + 1]];
                count += 1;
            }
            if x > 0 && labels[[y, x - 1]] != 0 {
                neighbors[count] = labels[[y, x - 1]];
                count += 1;
            }

            if count == 0 {
                let label = parent.len();
                parent.push(label);
                labels[[y, x]] = label;
            } else {
                let mut min = neighbors[0];
                for &n in &neighbors[1..count] {
                    if n < min {
                        min = n;
                    }
                }
                labels[[y, x]] = min;
                for &n in &neighbors[..count] {
                    union(&mut parent, min, n);
                }
            }
        }
    }

    // second pass: resolve roots and renumber compactly
    let mut remap = vec![0usize; parent.len()];
    let mut next = 0usize;
    for label in labels.iter_mut() {
        if *label == 0 {
            continue;
        }
        let root = find(&mut parent, *label);
        if remap[root] == 0 {
            next += 1;
            remap[root] = next;
        }
        *label = remap[root];
    }

    (labels, next)
}

/// Per-component sums of `img`, indexed by label (index 0 is background).
pub fn component_sums<F: DeblurFloat>(
    labels: &Array2<usize>,
    img: ArrayView2<F>,
    count: usize,
) -> Vec<F> {
    let mut sums = vec![F::zero(); count + 1];
    for (label, value) in labels.iter().zip(img.iter()) {
        sums[*label] += *value;
    }
    sums
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_empty_image_no_components() {
        let img = Array2::<f32>::zeros((5, 5));
        let (labels, count) = label_components(img.view());
        assert_eq!(count, 0);
        assert!(labels.iter().all(|&l| l == 0));
    }

    #[test]
    fn test_two_separated_blobs() {
        let mut img = Array2::<f32>::zeros((6, 6));
        img[[0, 0]] = 1.0;
        img[[0, 1]] = 1.0;
        img[[5, 5]] = 1.0;

        let (labels, count) = label_components(img.view());
        assert_eq!(count, 2);
        assert_eq!(labels[[0, 0]], labels[[0, 1]]);
        assert_ne!(labels[[0, 0]], labels[[5, 5]]);
    }

    #[test]
    fn test_diagonal_is_connected() {
        let mut img = Array2::<f32>::zeros((4, 4));
        img[[0, 0]] = 1.0;
        img[[1, 1]] = 1.0;
        img[[2, 2]] = 1.0;

        let (labels, count) = label_components(img.view());
        assert_eq!(count, 1);
        assert_eq!(labels[[0, 0]], labels[[2, 2]]);
    }

    #[test]
    fn test_u_shape_merges_branches() {
        // two vertical branches joined at the bottom: the second pass must
        // resolve the equivalence recorded when the scan reaches the base
        let mut img = Array2::<f32>::zeros((4, 3));
        img[[0, 0]] = 1.0;
        img[[1, 0]] = 1.0;
        img[[2, 0]] = 1.0;
        img[[0, 2]] = 1.0;
        img[[1, 2]] = 1.0;
        img[[2, 2]] = 1.0;
        img[[3, 1]] = 1.0;

        let (labels, count) = label_components(img.view());
        assert_eq!(count, 1);
        assert_eq!(labels[[0, 0]], labels[[0, 2]]);
    }

    #[test]
    fn test_component_sums() {
        let mut img = Array2::<f32>::zeros((4, 4));
        img[[0, 0]] = 0.25;
        img[[0, 1]] = 0.25;
        img[[3, 3]] = 0.5;

        let (labels, count) = label_components(img.view());
        let sums = component_sums(&labels, img.view(), count);

        assert_eq!(sums.len(), 3);
        assert!((sums[labels[[0, 0]]] - 0.5).abs() < 1e-6);
        assert!((sums[labels[[3, 3]]] - 0.5).abs() < 1e-6);
    }
}
