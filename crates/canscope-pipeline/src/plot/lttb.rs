//! Largest-Triangle-Three-Buckets downsampling

use super::buffer::Series;

/// Reduce a series to `threshold` points, keeping its visual shape
///
/// Inputs that already fit, and thresholds below 3, are returned unchanged.
/// Otherwise the result has exactly `threshold` points and keeps the first
/// and last sample.
pub fn lttb(times: &[f64], values: &[f64], threshold: usize) -> Series {
    let len = times.len().min(values.len());
    if len <= threshold || threshold < 3 {
        return Series {
            times: times[..len].to_vec(),
            values: values[..len].to_vec(),
        };
    }

    let mut out = Series {
        times: Vec::with_capacity(threshold),
        values: Vec::with_capacity(threshold),
    };
    out.times.push(times[0]);
    out.values.push(values[0]);

    let bucket = (len - 2) as f64 / (threshold - 2) as f64;
    let bound = |i: usize| ((i as f64 * bucket) as usize + 1).min(len);
    let mut a = 0usize;

    for i in 1..threshold - 1 {
        let start = bound(i - 1);
        let end = bound(i).max(start + 1).min(len - 1);

        let next_start = bound(i);
        let next_end = bound(i + 1);
        let (avg_x, avg_y) = if next_start < next_end {
            let n = (next_end - next_start) as f64;
            (
                times[next_start..next_end].iter().sum::<f64>() / n,
                values[next_start..next_end].iter().sum::<f64>() / n,
            )
        } else {
            (times[len - 1], values[len - 1])
        };

        let (ax, ay) = (times[a], values[a]);
        let mut best = start.min(len - 2);
        let mut best_area = -1.0;
        for j in start..end {
            let area = ((ax - avg_x) * (values[j] - ay) - (ax - times[j]) * (avg_y - ay)).abs();
            if area > best_area {
                best_area = area;
                best = j;
            }
        }

        out.times.push(times[best]);
        out.values.push(values[best]);
        a = best;
    }

    out.times.push(times[len - 1]);
    out.values.push(values[len - 1]);
    out
}
