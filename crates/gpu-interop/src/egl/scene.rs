//! The textured quad the presenter draws every frame.

use anyhow::{anyhow, Result};
use glium::backend::Facade;
use glium::index::PrimitiveType;
use glium::uniforms::{MagnifySamplerFilter, MinifySamplerFilter};
use glium::{implement_vertex, program, uniform, IndexBuffer, Program, Surface, Texture2d, VertexBuffer};

/// Background behind the quad.
pub const CLEAR_COLOR: (f32, f32, f32, f32) = (0.2, 0.3, 0.3, 1.0);

#[derive(Debug, Clone, Copy)]
struct Vertex {
    position: [f32; 3],
    tex_coords: [f32; 2],
}

implement_vertex!(Vertex, position, tex_coords);

/// Centered quad covering half the viewport in each direction. Texture
/// coordinates run top to bottom so row 0 of the image ends up on top.
const VERTICES: [Vertex; 4] = [
    Vertex { position: [0.5, 0.5, 0.0], tex_coords: [1.0, 0.0] },
    Vertex { position: [0.5, -0.5, 0.0], tex_coords: [1.0, 1.0] },
    Vertex { position: [-0.5, -0.5, 0.0], tex_coords: [0.0, 1.0] },
    Vertex { position: [-0.5, 0.5, 0.0], tex_coords: [0.0, 0.0] },
];

const INDICES: [u16; 6] = [0, 1, 3, 1, 2, 3];

pub(crate) struct QuadScene {
    vertices: VertexBuffer<Vertex>,
    indices: IndexBuffer<u16>,
    program: Program,
}

impl QuadScene {
    pub(crate) fn new(facade: &impl Facade) -> Result<Self> {
        let vertices = VertexBuffer::new(facade, &VERTICES)?;
        let indices = IndexBuffer::new(facade, PrimitiveType::TrianglesList, &INDICES)?;
        let program = program!(facade,
            140 => {
                vertex: "
                    #version 140
                    in vec3 position;
                    in vec2 tex_coords;
                    out vec2 v_tex_coords;
                    void main() {
                        gl_Position = vec4(position, 1.0);
                        v_tex_coords = tex_coords;
                    }
                ",
                fragment: "
                    #version 140
                    in vec2 v_tex_coords;
                    out vec4 color;
                    uniform sampler2D tex;
                    void main() {
                        color = texture(tex, v_tex_coords);
                    }
                ",
            },
            110 => {
                vertex: "
                    #version 110
                    attribute vec3 position;
                    attribute vec2 tex_coords;
                    varying vec2 v_tex_coords;
                    void main() {
                        gl_Position = vec4(position, 1.0);
                        v_tex_coords = tex_coords;
                    }
                ",
                fragment: "
                    #version 110
                    varying vec2 v_tex_coords;
                    uniform sampler2D tex;
                    void main() {
                        gl_FragColor = texture2D(tex, v_tex_coords);
                    }
                ",
            },
        )
        .map_err(|e| anyhow!("quad shader: {e}"))?;

        Ok(Self {
            vertices,
            indices,
            program,
        })
    }

    pub(crate) fn draw(
        &self,
        target: &mut impl Surface,
        texture: &Texture2d,
    ) -> Result<(), glium::DrawError> {
        target.clear_color(CLEAR_COLOR.0, CLEAR_COLOR.1, CLEAR_COLOR.2, CLEAR_COLOR.3);
        let uniforms = uniform! {
            tex: texture
                .sampled()
                .magnify_filter(MagnifySamplerFilter::Nearest)
                .minify_filter(MinifySamplerFilter::Nearest),
        };
        target.draw(
            &self.vertices,
            &self.indices,
            &self.program,
            &uniforms,
            &Default::default(),
        )
    }
}
