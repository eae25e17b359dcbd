use std::sync::{Arc, RwLock};

/// Single-writer, many-reader cell holding an immutable value.
///
/// The writer swaps in a whole new value; readers get an `Arc` to whichever value was
/// current and never see a partially updated one.
#[derive(Debug)]
pub struct Snapshot<T> {
    current: RwLock<Arc<T>>,
}

impl<T> Snapshot<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(value)),
        }
    }

    pub fn publish(&self, value: T) {
        let next = Arc::new(value);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            // A reader panicking cannot leave an Arc half-written.
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    pub fn load(&self) -> Arc<T> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }
}

impl<T: Default> Default for Snapshot<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn readers_keep_the_value_they_loaded() {
        let cell = Snapshot::new(vec![1, 2, 3]);
        let before = cell.load();
        cell.publish(vec![4]);
        assert_eq!(*before, vec![1, 2, 3]);
        assert_eq!(*cell.load(), vec![4]);
    }

    #[test]
    fn concurrent_readers_only_see_whole_values() {
        let cell = Arc::new(Snapshot::new((0u32, 0u32)));
        let writer = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                for i in 1..=1_000 {
                    cell.publish((i, i * 2));
                }
            })
        };
        for _ in 0..1_000 {
            let (a, b) = *cell.load();
            assert_eq!(b, a * 2);
        }
        writer.join().unwrap();
        assert_eq!(*cell.load(), (1_000, 2_000));
    }
}
