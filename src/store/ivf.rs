//! IVF-flat nearest-neighbor index over unit vectors.
//!
//! A coarse k-means quantizer buckets rows into inverted lists; a query
//! probes the nearest few lists and scans only their members. Rebuilt in
//! memory by `create_vector_index`; below the row threshold a flat scan
//! answers queries instead.

const KMEANS_ITERATIONS: usize = 8;
const MIN_LISTS: usize = 4;
const MAX_LISTS: usize = 256;

#[derive(Debug)]
pub struct IvfFlat {
    centroids: Vec<Vec<f32>>,
    lists: Vec<Vec<usize>>,
    nprobe: usize,
}

/// Cosine distance between unit vectors.
pub fn distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>()
}

impl IvfFlat {
    /// Train the coarse quantizer on all stored vectors. Deterministic:
    /// centroids are seeded from evenly spaced samples.
    pub fn build(vectors: &[&[f32]]) -> Option<Self> {
        let n = vectors.len();
        if n < MIN_LISTS * 2 {
            return None;
        }

        let nlist = ((n as f64).sqrt() as usize).clamp(MIN_LISTS, MAX_LISTS);
        let stride = n / nlist;
        let mut centroids: Vec<Vec<f32>> =
            (0..nlist).map(|i| vectors[i * stride].to_vec()).collect();

        let mut assignments = vec![0usize; n];
        for _ in 0..KMEANS_ITERATIONS {
            // assign
            for (i, v) in vectors.iter().enumerate() {
                assignments[i] = nearest_centroid(&centroids, v);
            }
            // update
            let dim = vectors[0].len();
            let mut sums = vec![vec![0f32; dim]; nlist];
            let mut counts = vec![0usize; nlist];
            for (i, v) in vectors.iter().enumerate() {
                let c = assignments[i];
                counts[c] += 1;
                for (s, x) in sums[c].iter_mut().zip(v.iter()) {
                    *s += x;
                }
            }
            for (c, sum) in sums.into_iter().enumerate() {
                if counts[c] == 0 {
                    continue; // keep the old centroid for empty lists
                }
                let mut mean: Vec<f32> =
                    sum.into_iter().map(|s| s / counts[c] as f32).collect();
                let norm = mean.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-12);
                for x in mean.iter_mut() {
                    *x /= norm;
                }
                centroids[c] = mean;
            }
        }

        let mut lists = vec![Vec::new(); nlist];
        for (i, v) in vectors.iter().enumerate() {
            lists[nearest_centroid(&centroids, v)].push(i);
        }

        let nprobe = (nlist / 8).max(1);
        Some(Self {
            centroids,
            lists,
            nprobe,
        })
    }

    /// Top-k `(row_index, distance)` among the probed lists.
    pub fn search(&self, query: &[f32], k: usize, vectors: &[&[f32]]) -> Vec<(usize, f32)> {
        let mut by_centroid: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(c, centroid)| (c, distance(query, centroid)))
            .collect();
        by_centroid.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut hits: Vec<(usize, f32)> = by_centroid
            .iter()
            .take(self.nprobe)
            .flat_map(|&(c, _)| self.lists[c].iter())
            .map(|&i| (i, distance(query, vectors[i])))
            .collect();

        hits.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        hits
    }
}

fn nearest_centroid(centroids: &[Vec<f32>], v: &[f32]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (c, centroid) in centroids.iter().enumerate() {
        let d = distance(centroid, v);
        if d < best_dist {
            best = c;
            best_dist = d;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(v: Vec<f32>) -> Vec<f32> {
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-12);
        v.into_iter().map(|x| x / norm).collect()
    }

    /// Two well-separated clusters around orthogonal axes.
    fn clustered_vectors(per_cluster: usize) -> Vec<Vec<f32>> {
        let mut vectors = Vec::new();
        for i in 0..per_cluster {
            let wiggle = (i % 10) as f32 * 0.01;
            vectors.push(unit(vec![1.0, wiggle, 0.0, 0.0]));
            vectors.push(unit(vec![0.0, 0.0, 1.0, wiggle]));
        }
        vectors
    }

    #[test]
    fn test_build_requires_enough_vectors() {
        let few: Vec<Vec<f32>> = (0..3).map(|_| unit(vec![1.0, 0.0])).collect();
        let refs: Vec<&[f32]> = few.iter().map(Vec::as_slice).collect();
        assert!(IvfFlat::build(&refs).is_none());
    }

    #[test]
    fn test_search_matches_flat_scan_top_hit() {
        let vectors = clustered_vectors(150);
        let refs: Vec<&[f32]> = vectors.iter().map(Vec::as_slice).collect();
        let index = IvfFlat::build(&refs).unwrap();

        let query = unit(vec![1.0, 0.02, 0.0, 0.0]);
        let hits = index.search(&query, 5, &refs);
        assert!(!hits.is_empty());

        // flat-scan reference
        let mut flat: Vec<(usize, f32)> = refs
            .iter()
            .enumerate()
            .map(|(i, v)| (i, distance(&query, v)))
            .collect();
        flat.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

        assert!((hits[0].1 - flat[0].1).abs() < 1e-5);
    }

    #[test]
    fn test_distances_sorted_ascending() {
        let vectors = clustered_vectors(100);
        let refs: Vec<&[f32]> = vectors.iter().map(Vec::as_slice).collect();
        let index = IvfFlat::build(&refs).unwrap();

        let query = unit(vec![0.0, 0.1, 1.0, 0.0]);
        let hits = index.search(&query, 20, &refs);
        for pair in hits.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
    }
}
