//! CPU-side landmark vertices and their GPU mirror.

use crate::error::{Error, Result};
use crate::landmark::{Landmark, NUM_LANDMARKS};

use super::{Backend, Vertex};

/// A fixed-capacity vertex array holding the `(x, y)` projection of one hand's landmarks, plus
/// the GPU buffer it is mirrored to.
///
/// [`GeometryBuffer::update`] only touches the CPU copy. The upload happens in
/// [`GeometryBuffer::ensure_uploaded`], at most once per call no matter how many updates came
/// before it.
pub struct GeometryBuffer<B: Backend> {
    vertices: [Vertex; NUM_LANDMARKS],
    /// Number of valid entries in `vertices`; either 0 or [`NUM_LANDMARKS`].
    len: usize,
    stale: bool,
    gpu: B::Points,
}

impl<B: Backend> GeometryBuffer<B> {
    /// Allocates the GPU buffer. The buffer starts out empty.
    pub fn new(backend: &mut B) -> anyhow::Result<Self> {
        Ok(Self {
            vertices: [Vertex::default(); NUM_LANDMARKS],
            len: 0,
            stale: false,
            gpu: backend.create_points(NUM_LANDMARKS)?,
        })
    }

    /// Replaces the vertex data with the `(x, y)` components of `landmarks`.
    ///
    /// Fails with [`ErrorKind::InvalidInput`] unless exactly [`NUM_LANDMARKS`] landmarks are
    /// given, leaving the buffer unchanged.
    ///
    /// [`ErrorKind::InvalidInput`]: crate::error::ErrorKind::InvalidInput
    pub fn update(&mut self, landmarks: &[Landmark]) -> Result<()> {
        if landmarks.len() != NUM_LANDMARKS {
            return Err(Error::InvalidInput {
                expected: NUM_LANDMARKS,
                actual: landmarks.len(),
            });
        }

        for (vertex, lm) in self.vertices.iter_mut().zip(landmarks) {
            *vertex = Vertex::new(lm.x, lm.y);
        }
        self.len = NUM_LANDMARKS;
        self.stale = true;
        Ok(())
    }

    /// Removes all points.
    pub fn clear(&mut self) {
        if self.len != 0 {
            self.len = 0;
            self.stale = true;
        }
    }

    /// Uploads the vertex data if it changed since the last upload.
    ///
    /// Returns whether an upload took place.
    pub fn ensure_uploaded(&mut self, backend: &mut B) -> bool {
        if !self.stale {
            return false;
        }
        if self.len != 0 {
            backend.write_points(&mut self.gpu, &self.vertices[..self.len]);
        }
        self.stale = false;
        true
    }

    /// Returns `true` if the CPU copy has changes that were not uploaded yet.
    #[inline]
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// The number of points to draw.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices[..self.len]
    }

    #[inline]
    pub fn points(&self) -> &B::Points {
        &self.gpu
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::render::mock::{Call, MockBackend};

    use super::*;

    fn landmarks(x0: f32) -> Vec<Landmark> {
        (0..NUM_LANDMARKS)
            .map(|i| match i {
                0 => Landmark::new(x0, 0.5, 0.0),
                i => Landmark::new(i as f32 / 100.0, 0.25, -0.5),
            })
            .collect()
    }

    #[test]
    fn uploads_latest_update_once() {
        let mut backend = MockBackend::default();
        let mut buf = GeometryBuffer::new(&mut backend).unwrap();

        buf.update(&landmarks(0.5)).unwrap();
        buf.update(&landmarks(0.6)).unwrap();
        assert!(buf.is_stale());
        assert!(buf.ensure_uploaded(&mut backend));
        assert!(!buf.ensure_uploaded(&mut backend));

        assert_eq!(backend.point_writes().len(), 1);
        assert_eq!(buf.points().data[0], Vertex::new(0.6, 0.5));
        assert_eq!(buf.points().data[20], Vertex::new(0.2, 0.25));
        assert_eq!(&buf.points().data[..], buf.vertices());
    }

    #[test]
    fn rejects_wrong_landmark_count() {
        let mut backend = MockBackend::default();
        let mut buf = GeometryBuffer::new(&mut backend).unwrap();
        buf.update(&landmarks(0.5)).unwrap();
        buf.ensure_uploaded(&mut backend);

        for count in [0, 20, 22] {
            let lms = vec![Landmark::new(0.9, 0.9, 0.9); count];
            let err = buf.update(&lms).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
        }

        assert!(!buf.is_stale());
        assert_eq!(buf.len(), NUM_LANDMARKS);
        assert_eq!(buf.vertices()[0], Vertex::new(0.5, 0.5));
    }

    #[test]
    fn clear_empties_buffer() {
        let mut backend = MockBackend::default();
        let mut buf = GeometryBuffer::new(&mut backend).unwrap();
        buf.clear();
        assert!(!buf.is_stale());

        buf.update(&landmarks(0.5)).unwrap();
        buf.ensure_uploaded(&mut backend);
        buf.clear();
        assert!(buf.is_empty());
        assert!(buf.ensure_uploaded(&mut backend));
        assert_eq!(
            backend.calls,
            [
                Call::CreatePoints(NUM_LANDMARKS),
                Call::WritePoints(landmarks(0.5).iter().map(|l| Vertex::new(l.x, l.y)).collect()),
            ]
        );
    }
}
