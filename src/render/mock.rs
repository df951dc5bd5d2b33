//! An in-memory [`Backend`] that records every call.

use anyhow::bail;

use crate::image::CaptureImage;
use crate::resolution::Resolution;

use super::{Backend, Vertex};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreatePoints(usize),
    WritePoints(Vec<Vertex>),
    CreateTexture(Resolution),
    WriteTexture(Resolution),
    Draw(Draw),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Draw {
    pub target: Resolution,
    pub background: Option<Resolution>,
    pub count: u32,
}

pub struct MockPoints {
    pub data: Vec<Vertex>,
}

pub struct MockTexture {
    pub res: Resolution,
}

#[derive(Default)]
pub struct MockBackend {
    pub fail_init: bool,
    pub inits: usize,
    pub calls: Vec<Call>,
}

impl MockBackend {
    pub fn point_writes(&self) -> Vec<&[Vertex]> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::WritePoints(v) => Some(&v[..]),
                _ => None,
            })
            .collect()
    }

    pub fn draws(&self) -> Vec<Draw> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Draw(d) => Some(*d),
                _ => None,
            })
            .collect()
    }
}

impl Backend for MockBackend {
    type Points = MockPoints;
    type Texture = MockTexture;

    fn init(&mut self) -> anyhow::Result<()> {
        self.inits += 1;
        if self.fail_init {
            bail!("shader compilation failed");
        }
        Ok(())
    }

    fn create_points(&mut self, capacity: usize) -> anyhow::Result<MockPoints> {
        self.calls.push(Call::CreatePoints(capacity));
        Ok(MockPoints {
            data: vec![Vertex::default(); capacity],
        })
    }

    fn write_points(&mut self, points: &mut MockPoints, vertices: &[Vertex]) {
        self.calls.push(Call::WritePoints(vertices.to_vec()));
        points.data[..vertices.len()].copy_from_slice(vertices);
    }

    fn create_texture(&mut self, res: Resolution) -> anyhow::Result<MockTexture> {
        self.calls.push(Call::CreateTexture(res));
        Ok(MockTexture { res })
    }

    fn write_texture(&mut self, texture: &mut MockTexture, image: &CaptureImage) {
        assert_eq!(texture.res, image.resolution());
        self.calls.push(Call::WriteTexture(image.resolution()));
    }

    fn draw(
        &mut self,
        target: Resolution,
        background: Option<&MockTexture>,
        _points: &MockPoints,
        count: u32,
    ) -> anyhow::Result<()> {
        self.calls.push(Call::Draw(Draw {
            target,
            background: background.map(|t| t.res),
            count,
        }));
        Ok(())
    }
}
