//! Uniform values, reflected slots and std140 block writing.

use std::fmt;

/// Shape of a reflected uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Float,
    Int,
    Vec2,
    Vec3,
    Vec4,
    /// Texture channel bound through `iChannelN`.
    Channel,
}

impl UniformKind {
    pub fn name(&self) -> &'static str {
        match self {
            UniformKind::Float => "float",
            UniformKind::Int => "int",
            UniformKind::Vec2 => "vec2",
            UniformKind::Vec3 => "vec3",
            UniformKind::Vec4 => "vec4",
            UniformKind::Channel => "channel",
        }
    }

    /// Parses a GLSL type keyword accepted inside the canvas uniform block.
    pub fn from_glsl(ty: &str) -> Option<Self> {
        match ty {
            "float" => Some(UniformKind::Float),
            "int" => Some(UniformKind::Int),
            "vec2" => Some(UniformKind::Vec2),
            "vec3" => Some(UniformKind::Vec3),
            "vec4" => Some(UniformKind::Vec4),
            _ => None,
        }
    }
}

/// Procedural or streamed texture source for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelSource {
    /// Current frame of the texture stream.
    Stream,
    Noise,
    Gradient,
    Stripes,
    Checker,
}

impl ChannelSource {
    pub const ALL: [ChannelSource; 5] = [
        ChannelSource::Stream,
        ChannelSource::Noise,
        ChannelSource::Gradient,
        ChannelSource::Stripes,
        ChannelSource::Checker,
    ];

    /// Default source per channel index.
    pub fn default_for(channel: usize) -> Self {
        match channel {
            0 => ChannelSource::Stream,
            1 => ChannelSource::Noise,
            2 => ChannelSource::Gradient,
            _ => ChannelSource::Stripes,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChannelSource::Stream => "Media stream",
            ChannelSource::Noise => "Noise",
            ChannelSource::Gradient => "Gradient",
            ChannelSource::Stripes => "Stripes",
            ChannelSource::Checker => "Checker",
        }
    }
}

/// A typed uniform value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Channel(ChannelSource),
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformValue::Float(_) => UniformKind::Float,
            UniformValue::Int(_) => UniformKind::Int,
            UniformValue::Vec2(_) => UniformKind::Vec2,
            UniformValue::Vec3(_) => UniformKind::Vec3,
            UniformValue::Vec4(_) => UniformKind::Vec4,
            UniformValue::Channel(_) => UniformKind::Channel,
        }
    }

    /// Zero value of `kind`.
    pub fn zero(kind: UniformKind) -> Self {
        match kind {
            UniformKind::Float => UniformValue::Float(0.0),
            UniformKind::Int => UniformValue::Int(0),
            UniformKind::Vec2 => UniformValue::Vec2([0.0; 2]),
            UniformKind::Vec3 => UniformValue::Vec3([0.0; 3]),
            UniformKind::Vec4 => UniformValue::Vec4([0.0; 4]),
            UniformKind::Channel => UniformValue::Channel(ChannelSource::Stream),
        }
    }

    /// Converts to `kind` where that is lossless. Integral floats become ints.
    pub fn coerce(self, kind: UniformKind) -> Option<Self> {
        if self.kind() == kind {
            return Some(self);
        }
        match (self, kind) {
            (UniformValue::Int(i), UniformKind::Float) => Some(UniformValue::Float(i as f32)),
            (UniformValue::Float(f), UniformKind::Int) if f.fract() == 0.0 && f.abs() <= i32::MAX as f32 => {
                Some(UniformValue::Int(f as i32))
            }
            _ => None,
        }
    }

    /// Parses a GLSL initializer such as `0.5`, `2` or `vec3(1.0, 0.5, 0.0)`.
    pub fn parse_glsl(kind: UniformKind, text: &str) -> Option<Self> {
        let text = text.trim();
        let args = match text.find('(') {
            Some(open) if text.ends_with(')') => {
                // Only the kind's own constructor, never a function call.
                let callee = text[..open].trim();
                if !callee.is_empty() && callee != kind.name() {
                    return None;
                }
                &text[open + 1..text.len() - 1]
            }
            Some(_) => return None,
            None => text,
        };
        let numbers: Vec<f32> = args
            .split(',')
            .map(|n| n.trim().trim_end_matches(['f', 'F']).parse::<f32>())
            .collect::<Result<_, _>>()
            .ok()?;
        let component = |i: usize| -> Option<f32> {
            match numbers.len() {
                1 => Some(numbers[0]),
                _ => numbers.get(i).copied(),
            }
        };
        match kind {
            UniformKind::Float if numbers.len() == 1 => Some(UniformValue::Float(numbers[0])),
            UniformKind::Int if numbers.len() == 1 => Some(UniformValue::Int(numbers[0] as i32)),
            UniformKind::Vec2 if numbers.len() == 1 || numbers.len() == 2 => {
                Some(UniformValue::Vec2([component(0)?, component(1)?]))
            }
            UniformKind::Vec3 if numbers.len() == 1 || numbers.len() == 3 => {
                Some(UniformValue::Vec3([component(0)?, component(1)?, component(2)?]))
            }
            UniformKind::Vec4 if numbers.len() == 1 || numbers.len() == 4 => Some(UniformValue::Vec4([
                component(0)?,
                component(1)?,
                component(2)?,
                component(3)?,
            ])),
            _ => None,
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::Float(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::Int(v)
    }
}

impl From<[f32; 2]> for UniformValue {
    fn from(v: [f32; 2]) -> Self {
        UniformValue::Vec2(v)
    }
}

impl From<[f32; 3]> for UniformValue {
    fn from(v: [f32; 3]) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<[f32; 4]> for UniformValue {
    fn from(v: [f32; 4]) -> Self {
        UniformValue::Vec4(v)
    }
}

impl From<ChannelSource> for UniformValue {
    fn from(v: ChannelSource) -> Self {
        UniformValue::Channel(v)
    }
}

impl fmt::Display for UniformValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniformValue::Float(v) => write!(f, "{:.3}", v),
            UniformValue::Int(v) => write!(f, "{}", v),
            UniformValue::Vec2(v) => write!(f, "({:.3}, {:.3})", v[0], v[1]),
            UniformValue::Vec3(v) => write!(f, "({:.3}, {:.3}, {:.3})", v[0], v[1], v[2]),
            UniformValue::Vec4(v) => write!(f, "({:.3}, {:.3}, {:.3}, {:.3})", v[0], v[1], v[2], v[3]),
            UniformValue::Channel(c) => f.write_str(c.label()),
        }
    }
}

/// A reflected uniform: block member or channel binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformSlot {
    pub name: String,
    pub kind: UniformKind,
    /// Byte offset inside the uniform block. Channel index for channels.
    pub offset: u32,
    /// Element count, 1 unless the member is an array.
    pub count: u32,
    /// Array stride in bytes.
    pub stride: u32,
}

/// Reflected uniform set of one compiled program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniformLayout {
    slots: Vec<UniformSlot>,
    block_size: u32,
}

impl UniformLayout {
    pub fn new(slots: Vec<UniformSlot>, block_size: u32) -> Self {
        Self { slots, block_size }
    }

    pub fn slots(&self) -> &[UniformSlot] {
        &self.slots
    }

    pub fn get(&self, name: &str) -> Option<&UniformSlot> {
        self.slots.iter().find(|s| s.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Slots the user may edit: everything except canvas-driven inputs.
    pub fn user_slots(&self) -> impl Iterator<Item = &UniformSlot> {
        self.slots.iter().filter(|s| !is_builtin(&s.name))
    }
}

/// Per-frame values for the canvas-driven uniforms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInputs {
    pub resolution: [f32; 2],
    pub time: f32,
    pub time_delta: f32,
    pub frame: i32,
    pub frame_rate: f32,
    /// Pointer position and last click position, bottom-left origin, pixels.
    pub mouse: [f32; 4],
    /// Year, month (0-11), day, seconds since midnight.
    pub date: [f32; 4],
    /// Playback time of the media stream.
    pub stream_time: f32,
}

impl Default for FrameInputs {
    fn default() -> Self {
        Self {
            resolution: [1.0, 1.0],
            time: 0.0,
            time_delta: 0.0,
            frame: 0,
            frame_rate: 0.0,
            mouse: [0.0; 4],
            date: [0.0; 4],
            stream_time: 0.0,
        }
    }
}

pub const SAMPLE_RATE: f32 = 44_100.0;

/// Uniforms filled from [`FrameInputs`] every render.
pub const BUILTIN_NAMES: &[&str] = &[
    "iResolution",
    "iTime",
    "iTimeDelta",
    "iFrameRate",
    "iFrame",
    "iMouse",
    "iDate",
    "iSampleRate",
    "iChannelTime",
    "iChannelResolution",
    "time",
    "resolution",
    "mouse",
    "frame",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_NAMES.contains(&name)
}

/// Channel slot name for channel index `channel`.
pub fn channel_name(channel: usize) -> String {
    format!("iChannel{}", channel)
}

/// Channel index of an `iChannelN` name.
pub fn channel_index(name: &str) -> Option<usize> {
    let n: usize = name.strip_prefix("iChannel")?.parse().ok()?;
    (n < 4).then_some(n)
}

/// std140 uniform block image for one draw.
pub(crate) struct BlockWriter {
    bytes: Vec<u8>,
}

impl BlockWriter {
    pub(crate) fn new(size: u32) -> Self {
        Self {
            bytes: vec![0; size as usize],
        }
    }

    fn put(&mut self, offset: usize, data: &[u8]) {
        if let Some(dst) = self.bytes.get_mut(offset..offset + data.len()) {
            dst.copy_from_slice(data);
        }
    }

    /// Writes `value` to element `index` of `slot`. Mismatched kinds are ignored.
    pub(crate) fn write(&mut self, slot: &UniformSlot, index: u32, value: &UniformValue) {
        if slot.kind == UniformKind::Channel || index >= slot.count {
            return;
        }
        let Some(value) = value.coerce(slot.kind) else {
            return;
        };
        let offset = (slot.offset + index * slot.stride) as usize;
        match value {
            UniformValue::Float(v) => self.put(offset, bytemuck::bytes_of(&v)),
            UniformValue::Int(v) => self.put(offset, bytemuck::bytes_of(&v)),
            UniformValue::Vec2(v) => self.put(offset, bytemuck::cast_slice(&v)),
            UniformValue::Vec3(v) => self.put(offset, bytemuck::cast_slice(&v)),
            UniformValue::Vec4(v) => self.put(offset, bytemuck::cast_slice(&v)),
            UniformValue::Channel(_) => {}
        }
    }

    /// Fills every canvas-driven slot present in `layout`.
    pub(crate) fn write_builtins(&mut self, layout: &UniformLayout, inputs: &FrameInputs, channels: &[[f32; 3]; 4], channel_time: [f32; 4]) {
        let [w, h] = inputs.resolution;
        for slot in layout.slots() {
            match slot.name.as_str() {
                "iResolution" => self.write(slot, 0, &UniformValue::Vec3([w, h, 1.0])),
                "iTime" | "time" => self.write(slot, 0, &UniformValue::Float(inputs.time)),
                "iTimeDelta" => self.write(slot, 0, &UniformValue::Float(inputs.time_delta)),
                "iFrameRate" => self.write(slot, 0, &UniformValue::Float(inputs.frame_rate)),
                "iFrame" | "frame" => self.write(slot, 0, &UniformValue::Int(inputs.frame)),
                "iMouse" => self.write(slot, 0, &UniformValue::Vec4(inputs.mouse)),
                "mouse" => {
                    let normalized = [inputs.mouse[0] / w.max(1.0), inputs.mouse[1] / h.max(1.0)];
                    self.write(slot, 0, &UniformValue::Vec2(normalized));
                }
                "resolution" => self.write(slot, 0, &UniformValue::Vec2([w, h])),
                "iDate" => self.write(slot, 0, &UniformValue::Vec4(inputs.date)),
                "iSampleRate" => self.write(slot, 0, &UniformValue::Float(SAMPLE_RATE)),
                "iChannelTime" => self.write(slot, 0, &UniformValue::Vec4(channel_time)),
                "iChannelResolution" => {
                    for (i, res) in channels.iter().enumerate() {
                        self.write(slot, i as u32, &UniformValue::Vec3(*res));
                    }
                }
                _ => {}
            }
        }
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_floats(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn slot(name: &str, kind: UniformKind, offset: u32) -> UniformSlot {
        UniformSlot {
            name: name.to_string(),
            kind,
            offset,
            count: 1,
            stride: 0,
        }
    }

    #[test]
    fn test_parse_glsl_initializers() {
        assert_eq!(UniformValue::parse_glsl(UniformKind::Float, "1.5"), Some(UniformValue::Float(1.5)));
        assert_eq!(UniformValue::parse_glsl(UniformKind::Int, "3"), Some(UniformValue::Int(3)));
        assert_eq!(
            UniformValue::parse_glsl(UniformKind::Vec3, "vec3(1.0, 0.5, 0.0)"),
            Some(UniformValue::Vec3([1.0, 0.5, 0.0]))
        );
        assert_eq!(
            UniformValue::parse_glsl(UniformKind::Vec4, "vec4(0.25)"),
            Some(UniformValue::Vec4([0.25; 4]))
        );
        assert_eq!(UniformValue::parse_glsl(UniformKind::Vec2, "vec2(1.0, 2.0, 3.0)"), None);
        assert_eq!(UniformValue::parse_glsl(UniformKind::Float, "sin(1.0)"), None);
        assert_eq!(UniformValue::parse_glsl(UniformKind::Float, "float(2.0)"), Some(UniformValue::Float(2.0)));
        assert_eq!(UniformValue::parse_glsl(UniformKind::Vec2, "vec3(1.0, 2.0)"), None);
        assert_eq!(UniformValue::parse_glsl(UniformKind::Vec2, "normalize(1.0, 2.0)"), None);
    }

    #[test]
    fn test_coerce_int_and_float() {
        assert_eq!(UniformValue::Float(2.0).coerce(UniformKind::Int), Some(UniformValue::Int(2)));
        assert_eq!(UniformValue::Float(2.5).coerce(UniformKind::Int), None);
        assert_eq!(UniformValue::Int(4).coerce(UniformKind::Float), Some(UniformValue::Float(4.0)));
        assert_eq!(UniformValue::Float(1.0).coerce(UniformKind::Vec2), None);
    }

    #[test]
    fn test_block_writer_places_values_at_offsets() {
        let layout = UniformLayout::new(
            vec![
                slot("iResolution", UniformKind::Vec3, 0),
                slot("iTime", UniformKind::Float, 12),
                slot("gain", UniformKind::Float, 16),
            ],
            32,
        );
        let mut writer = BlockWriter::new(layout.block_size());
        let inputs = FrameInputs {
            resolution: [640.0, 480.0],
            time: 2.0,
            ..Default::default()
        };
        writer.write_builtins(&layout, &inputs, &[[0.0; 3]; 4], [0.0; 4]);
        writer.write(&layout.slots()[2], 0, &UniformValue::Float(0.5));
        let floats = as_floats(&writer.finish());
        assert_eq!(&floats[0..5], &[640.0, 480.0, 1.0, 2.0, 0.5]);
    }

    #[test]
    fn test_array_elements_use_stride() {
        let array = UniformSlot {
            name: "iChannelResolution".to_string(),
            kind: UniformKind::Vec3,
            offset: 0,
            count: 4,
            stride: 16,
        };
        let layout = UniformLayout::new(vec![array], 64);
        let mut writer = BlockWriter::new(64);
        let res = [[1.0, 1.0, 1.0], [2.0, 2.0, 1.0], [3.0, 3.0, 1.0], [4.0, 4.0, 1.0]];
        writer.write_builtins(&layout, &FrameInputs::default(), &res, [0.0; 4]);
        let floats = as_floats(&writer.finish());
        assert_eq!(floats[4], 2.0);
        assert_eq!(floats[12], 4.0);
    }

    #[test]
    fn test_channel_names() {
        assert_eq!(channel_index("iChannel2"), Some(2));
        assert_eq!(channel_index("iChannel4"), None);
        assert_eq!(channel_name(3), "iChannel3");
        assert!(is_builtin("iTime"));
        assert!(!is_builtin("gain"));
    }
}
