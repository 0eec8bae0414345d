use std::num::NonZeroUsize;

/// `ceil(len / workers)`: the largest chunk [`partition`] produces.
pub fn chunk_size(len: usize, workers: NonZeroUsize) -> usize {
    len.div_ceil(workers.get())
}

/// Splits `items` into consecutive chunks of [`chunk_size`] elements; the
/// last chunk may be shorter.
///
/// Concatenating the chunks gives back `items` unchanged, and there are never
/// more chunks than workers. An empty input gives no chunks.
///
/// # Examples
///
/// ```
/// use metrix_agent::partition::partition;
/// use std::num::NonZeroUsize;
///
/// let workers = NonZeroUsize::new(3).unwrap();
/// assert_eq!(partition(vec![1, 2, 3, 4, 5], workers), vec![vec![1, 2], vec![3, 4], vec![5]]);
/// assert_eq!(partition(vec![1], workers), vec![vec![1]]);
/// assert!(partition(Vec::<u8>::new(), workers).is_empty());
/// ```
pub fn partition<T>(items: Vec<T>, workers: NonZeroUsize) -> Vec<Vec<T>> {
    let size = chunk_size(items.len(), workers);
    if size == 0 {
        return Vec::new();
    }
    let mut chunks = Vec::with_capacity(items.len().div_ceil(size));
    let mut iter = items.into_iter();
    loop {
        let chunk: Vec<T> = iter.by_ref().take(size).collect();
        if chunk.is_empty() {
            break;
        }
        chunks.push(chunk);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn covers_every_element_once() {
        for len in 0..50 {
            for workers in 1..12 {
                let items: Vec<usize> = (0..len).collect();
                let chunks = partition(items.clone(), nz(workers));

                let flat: Vec<usize> = chunks.iter().flatten().copied().collect();
                assert_eq!(flat, items, "len={len} workers={workers}");
                assert!(chunks.len() <= workers, "len={len} workers={workers}");

                let limit = chunk_size(len, nz(workers));
                for chunk in &chunks {
                    assert!(!chunk.is_empty());
                    assert!(chunk.len() <= limit, "len={len} workers={workers}");
                }
            }
        }
    }

    #[test]
    fn fewer_items_than_workers_gives_singletons() {
        let chunks = partition(vec!['a', 'b'], nz(5));
        assert_eq!(chunks, vec![vec!['a'], vec!['b']]);
    }

    #[test]
    fn single_worker_takes_everything() {
        assert_eq!(partition(vec![1, 2, 3], nz(1)), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn chunk_size_rounds_up() {
        assert_eq!(chunk_size(3, nz(2)), 2);
        assert_eq!(chunk_size(4, nz(2)), 2);
        assert_eq!(chunk_size(0, nz(4)), 0);
        assert_eq!(chunk_size(10, nz(3)), 4);
    }
}
