//! Built-in shaders offered by the overlay preset picker.

/// A named shader source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preset {
    pub name: &'static str,
    pub source: &'static str,
}

pub const PRESETS: &[Preset] = &[
    Preset {
        name: "Plasma",
        source: r#"uniform float speed = 1.0;
uniform vec3 tint = vec3(1.0, 0.8, 0.6);

void mainImage(out vec4 fragColor, in vec2 fragCoord) {
    vec2 uv = fragCoord / iResolution.xy;
    float t = iTime * speed;
    float v = sin(uv.x * 10.0 + t) + sin(uv.y * 8.0 - t) + sin((uv.x + uv.y) * 6.0 + t * 0.5);
    vec3 col = 0.5 + 0.5 * cos(v + vec3(0.0, 2.0, 4.0));
    fragColor = vec4(col * tint, 1.0);
}
"#,
    },
    Preset {
        name: "Media passthrough",
        source: r#"void mainImage(out vec4 fragColor, in vec2 fragCoord) {
    vec2 uv = fragCoord / iResolution.xy;
    fragColor = texture(iChannel0, uv);
}
"#,
    },
    Preset {
        name: "Media ripple",
        source: r#"uniform float strength = 0.02;

void mainImage(out vec4 fragColor, in vec2 fragCoord) {
    vec2 uv = fragCoord / iResolution.xy;
    vec2 center = iMouse.z > 0.0 ? iMouse.xy / iResolution.xy : vec2(0.5);
    float d = distance(uv, center);
    uv += normalize(uv - center + 1e-5) * sin(d * 40.0 - iTime * 4.0) * strength;
    fragColor = texture(iChannel0, uv);
}
"#,
    },
    Preset {
        name: "Noise blend",
        source: r#"uniform float mixAmount = 0.35;

void mainImage(out vec4 fragColor, in vec2 fragCoord) {
    vec2 uv = fragCoord / iResolution.xy;
    vec4 media = texture(iChannel0, uv);
    vec4 noise = texture(iChannel1, uv * 2.0 + vec2(iTime * 0.05, 0.0));
    fragColor = vec4(mix(media.rgb, noise.rgb, mixAmount), 1.0);
}
"#,
    },
    Preset {
        name: "Solid red",
        source: "void main(){gl_FragColor=vec4(1,0,0,1);}\n",
    },
];

/// Preset used when no shader file is configured.
pub fn default_preset() -> &'static Preset {
    &PRESETS[0]
}

pub fn find_preset(name: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::{compile, ShaderLanguage, ShaderTarget};

    #[test]
    fn test_every_preset_compiles() {
        let target = ShaderTarget {
            language: ShaderLanguage::Wgsl,
            flip_frag_coord: true,
        };
        for preset in PRESETS {
            if let Err(diagnostic) = compile(preset.source, target) {
                panic!("preset {} failed: {}", preset.name, diagnostic);
            }
        }
    }

    #[test]
    fn test_find_preset_ignores_case() {
        assert_eq!(find_preset("plasma").map(|p| p.name), Some("Plasma"));
        assert!(find_preset("missing").is_none());
        assert_eq!(default_preset().name, "Plasma");
    }
}
