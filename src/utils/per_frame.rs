/// A fixed ring of per-frame-in-flight values.
///
/// The ring never grows; resizing a swapchain replaces the whole ring.
pub struct PerFrame<T> {
    frames: Vec<T>,
    curr_frame: usize,
}

impl<T> PerFrame<T> {
    /// Build every slot with a fallible constructor. Stops at the first error.
    pub fn try_new<E, F>(num_frames: usize, make: F) -> Result<Self, E>
    where
        F: FnMut(usize) -> Result<T, E>,
    {
        let frames = (0..num_frames).map(make).collect::<Result<Vec<_>, E>>()?;
        Ok(Self {
            frames,
            curr_frame: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<&T> {
        self.frames.get(slot)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.frames.iter()
    }

    /// Slot of the frame being prepared.
    pub fn curr(&self) -> &T {
        &self.frames[self.curr_frame]
    }

    pub fn curr_mut(&mut self) -> &mut T {
        &mut self.frames[self.curr_frame]
    }

    pub fn curr_idx(&self) -> usize {
        self.curr_frame
    }

    pub fn advance_next_frame(&mut self) {
        if !self.frames.is_empty() {
            self.curr_frame = (self.curr_frame + 1) % self.frames.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_wraps_modulo_frame_count() {
        let mut ring = PerFrame::try_new(2, Ok::<_, ()>).unwrap();
        assert_eq!(ring.curr_idx(), 0);
        ring.advance_next_frame();
        assert_eq!(*ring.curr(), 1);
        ring.advance_next_frame();
        assert_eq!(ring.curr_idx(), 0);
    }

    #[test]
    fn try_new_stops_at_first_error() {
        let mut built = Vec::new();
        let res: Result<PerFrame<usize>, &str> = PerFrame::try_new(4, |i| {
            if i == 2 {
                return Err("boom");
            }
            built.push(i);
            Ok(i)
        });
        assert_eq!(res.err(), Some("boom"));
        assert_eq!(built, vec![0, 1]);
    }

    #[test]
    fn slots_are_addressable() {
        let ring: PerFrame<usize> = PerFrame::try_new(3, |i| Ok::<_, ()>(i * 10)).unwrap();
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.get(2), Some(&20));
        assert_eq!(ring.get(3), None);
        assert_eq!(ring.iter().sum::<usize>(), 30);
    }
}
