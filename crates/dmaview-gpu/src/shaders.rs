//! Built-in GLSL ES programs and the full-screen quad they draw.

use crate::driver::{attrib, ProgramKind, ProgramSource, VertexAttribPointer};
use bytemuck::{Pod, Zeroable};

const QUAD_VERTEX: &str = r#"
attribute vec2 a_position;
attribute vec2 a_tex_coord;
varying vec2 v_tex_coord;

void main() {
    gl_Position = vec4(a_position, 0.0, 1.0);
    v_tex_coord = a_tex_coord;
}
"#;

const YUV_TO_RGB_FRAGMENT: &str = r#"
precision mediump float;
varying vec2 v_tex_coord;
uniform sampler2D u_luma;
uniform sampler2D u_chroma;
uniform int u_has_chroma;
uniform mat3 u_yuv_matrix;
uniform vec3 u_yuv_offset;

void main() {
    float y = texture2D(u_luma, v_tex_coord).r;
    vec3 rgb;
    if (u_has_chroma == 1) {
        vec2 cbcr = texture2D(u_chroma, v_tex_coord).rg;
        rgb = u_yuv_matrix * (vec3(y, cbcr) - u_yuv_offset);
    } else {
        rgb = vec3((y - u_yuv_offset.x) * u_yuv_matrix[0][0]);
    }
    gl_FragColor = vec4(clamp(rgb, 0.0, 1.0), 1.0);
}
"#;

const BLIT_FRAGMENT: &str = r#"
precision mediump float;
varying vec2 v_tex_coord;
uniform sampler2D u_texture;

void main() {
    gl_FragColor = texture2D(u_texture, v_tex_coord);
}
"#;

pub const YUV_TO_RGB: ProgramSource = ProgramSource {
    kind: ProgramKind::YuvToRgb,
    label: "yuv-to-rgb",
    vertex: QUAD_VERTEX,
    fragment: YUV_TO_RGB_FRAGMENT,
};

pub const BLIT: ProgramSource = ProgramSource {
    kind: ProgramKind::Blit,
    label: "blit",
    vertex: QUAD_VERTEX,
    fragment: BLIT_FRAGMENT,
};

/// Uniform names shared by the GLSL above and the software driver.
pub mod uniforms {
    pub const LUMA: &str = "u_luma";
    pub const CHROMA: &str = "u_chroma";
    pub const HAS_CHROMA: &str = "u_has_chroma";
    pub const YUV_MATRIX: &str = "u_yuv_matrix";
    pub const YUV_OFFSET: &str = "u_yuv_offset";
    pub const TEXTURE: &str = "u_texture";
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
    pub tex_coord: [f32; 2],
}

const fn vertex(x: f32, y: f32, u: f32, v: f32) -> QuadVertex {
    QuadVertex {
        position: [x, y],
        tex_coord: [u, v],
    }
}

/// Triangle strip covering clip space; texture row 0 lands on window row 0.
pub static FULLSCREEN_QUAD: [QuadVertex; 4] = [
    vertex(-1.0, -1.0, 0.0, 0.0),
    vertex(1.0, -1.0, 1.0, 0.0),
    vertex(-1.0, 1.0, 0.0, 1.0),
    vertex(1.0, 1.0, 1.0, 1.0),
];

pub const QUAD_VERTEX_COUNT: u32 = FULLSCREEN_QUAD.len() as u32;

/// `(index, pointer)` pairs for the quad's position and texcoord arrays.
pub fn quad_attrib_pointers() -> [(u32, VertexAttribPointer); 2] {
    let data: &'static [f32] = bytemuck::cast_slice(&FULLSCREEN_QUAD);
    let stride = (std::mem::size_of::<QuadVertex>() / std::mem::size_of::<f32>()) as u32;
    [
        (
            attrib::POSITION,
            VertexAttribPointer {
                components: 2,
                stride,
                offset: 0,
                data,
            },
        ),
        (
            attrib::TEX_COORD,
            VertexAttribPointer {
                components: 2,
                stride,
                offset: 2,
                data,
            },
        ),
    ]
}
