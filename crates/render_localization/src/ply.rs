//! Minimal PLY reader for colored point clouds.
//!
//! Reads the `vertex` element (`x`, `y`, `z` and optional `red`, `green`,
//! `blue`) from ASCII or binary files. Other elements are skipped, alpha is
//! ignored and points without color come out gray.

use cloud_render::PointCloud;

pub const DEFAULT_POINT_COLOR: [u8; 3] = [128, 128, 128];

#[derive(Debug, thiserror::Error)]
pub enum PlyError {
    #[error("malformed PLY header: {0}")]
    Header(String),

    #[error("unsupported PLY format '{0}'")]
    UnsupportedFormat(String),

    #[error("vertex element has no '{0}' property")]
    MissingProperty(&'static str),

    #[error("PLY body ends inside element '{element}' at item {index}")]
    Truncated { element: String, index: usize },

    #[error("bad value '{token}' in element '{element}'")]
    BadValue { element: String, token: String },

    #[error(transparent)]
    Geometry(#[from] cloud_render::RenderError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scalar {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl Scalar {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "char" | "int8" => Scalar::I8,
            "uchar" | "uint8" => Scalar::U8,
            "short" | "int16" => Scalar::I16,
            "ushort" | "uint16" => Scalar::U16,
            "int" | "int32" => Scalar::I32,
            "uint" | "uint32" => Scalar::U32,
            "float" | "float32" => Scalar::F32,
            "double" | "float64" => Scalar::F64,
            _ => return None,
        })
    }

    fn size(self) -> usize {
        match self {
            Scalar::I8 | Scalar::U8 => 1,
            Scalar::I16 | Scalar::U16 => 2,
            Scalar::I32 | Scalar::U32 | Scalar::F32 => 4,
            Scalar::F64 => 8,
        }
    }

    /// Decodes one value; `bytes` holds at least `self.size()` bytes.
    fn decode(self, bytes: &[u8], big_endian: bool) -> f64 {
        macro_rules! read {
            ($t:ty) => {{
                const N: usize = std::mem::size_of::<$t>();
                let mut raw = [0u8; N];
                raw.copy_from_slice(&bytes[..N]);
                if big_endian {
                    <$t>::from_be_bytes(raw) as f64
                } else {
                    <$t>::from_le_bytes(raw) as f64
                }
            }};
        }
        match self {
            Scalar::I8 => read!(i8),
            Scalar::U8 => read!(u8),
            Scalar::I16 => read!(i16),
            Scalar::U16 => read!(u16),
            Scalar::I32 => read!(i32),
            Scalar::U32 => read!(u32),
            Scalar::F32 => read!(f32),
            Scalar::F64 => read!(f64),
        }
    }

    fn is_float(self) -> bool {
        matches!(self, Scalar::F32 | Scalar::F64)
    }
}

#[derive(Debug, Clone)]
enum Property {
    Scalar { name: String, kind: Scalar },
    List { count: Scalar, item: Scalar },
}

#[derive(Debug, Clone)]
struct Element {
    name:       String,
    count:      usize,
    properties: Vec<Property>,
}

struct Header {
    format:   Format,
    elements: Vec<Element>,
    /// Offset of the first body byte.
    body:     usize,
}

fn parse_header(data: &[u8]) -> Result<Header, PlyError> {
    let mut offset = 0;
    let mut lines = Vec::new();
    loop {
        let rest = &data[offset..];
        let end = rest
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| PlyError::Header("missing end_header".into()))?;
        let line = std::str::from_utf8(&rest[..end])
            .map_err(|_| PlyError::Header("header is not text".into()))?
            .trim_end_matches('\r')
            .trim();
        offset += end + 1;
        if line == "end_header" {
            break;
        }
        lines.push(line.to_string());
    }

    let mut lines = lines.into_iter();
    if lines.next().as_deref() != Some("ply") {
        return Err(PlyError::Header("missing 'ply' magic".into()));
    }

    let mut format = None;
    let mut elements: Vec<Element> = Vec::new();
    for line in lines {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] | ["comment", ..] | ["obj_info", ..] => {}
            ["format", name, _version] => {
                format = Some(match *name {
                    "ascii" => Format::Ascii,
                    "binary_little_endian" => Format::BinaryLittleEndian,
                    "binary_big_endian" => Format::BinaryBigEndian,
                    other => return Err(PlyError::UnsupportedFormat(other.to_string())),
                });
            }
            ["element", name, count] => {
                let count = count
                    .parse()
                    .map_err(|_| PlyError::Header(format!("bad element count '{count}'")))?;
                elements.push(Element {
                    name: name.to_string(),
                    count,
                    properties: Vec::new(),
                });
            }
            ["property", "list", count, item, _name] => {
                let property = Property::List {
                    count: scalar(count)?,
                    item:  scalar(item)?,
                };
                current(&mut elements)?.properties.push(property);
            }
            ["property", kind, name] => {
                let property = Property::Scalar {
                    name: name.to_string(),
                    kind: scalar(kind)?,
                };
                current(&mut elements)?.properties.push(property);
            }
            _ => return Err(PlyError::Header(format!("unexpected line '{line}'"))),
        }
    }

    Ok(Header {
        format: format.ok_or_else(|| PlyError::Header("missing format line".into()))?,
        elements,
        body: offset,
    })
}

fn scalar(name: &str) -> Result<Scalar, PlyError> {
    Scalar::parse(name).ok_or_else(|| PlyError::Header(format!("unknown property type '{name}'")))
}

fn current(elements: &mut [Element]) -> Result<&mut Element, PlyError> {
    elements
        .last_mut()
        .ok_or_else(|| PlyError::Header("property before any element".into()))
}

/// Indices of the vertex properties we keep, in property order.
struct VertexLayout {
    xyz: [usize; 3],
    rgb: Option<[usize; 3]>,
    /// Float colors are in [0, 1].
    float_rgb: bool,
    properties: usize,
}

impl VertexLayout {
    fn new(element: &Element) -> Result<Self, PlyError> {
        let find = |wanted: &str| {
            element.properties.iter().position(|p| {
                matches!(p, Property::Scalar { name, .. } if name == wanted)
            })
        };
        let x = find("x").ok_or(PlyError::MissingProperty("x"))?;
        let y = find("y").ok_or(PlyError::MissingProperty("y"))?;
        let z = find("z").ok_or(PlyError::MissingProperty("z"))?;
        let rgb = match (find("red"), find("green"), find("blue")) {
            (Some(r), Some(g), Some(b)) => Some([r, g, b]),
            _ => None,
        };
        let float_rgb = rgb.is_some_and(|[r, ..]| {
            matches!(element.properties[r], Property::Scalar { kind, .. } if kind.is_float())
        });
        Ok(Self {
            xyz: [x, y, z],
            rgb,
            float_rgb,
            properties: element.properties.len(),
        })
    }

    /// Fewest bytes one vertex can occupy in any encoding.
    fn min_record_size(&self) -> usize {
        self.properties.max(1)
    }

    fn color(&self, values: &[f64]) -> [u8; 3] {
        match self.rgb {
            Some(idx) => idx.map(|i| {
                let v = if self.float_rgb { values[i] * 255.0 } else { values[i] };
                v.round().clamp(0.0, 255.0) as u8
            }),
            None => DEFAULT_POINT_COLOR,
        }
    }
}

/// Parses a PLY file held in memory.
pub fn parse_ply(data: &[u8]) -> Result<PointCloud, PlyError> {
    let header = parse_header(data)?;
    let vertex = header
        .elements
        .iter()
        .find(|e| e.name == "vertex")
        .ok_or_else(|| PlyError::Header("no vertex element".into()))?;
    let layout = VertexLayout::new(vertex)?;

    // The header count is untrusted; never reserve more than the body can hold.
    let capacity = vertex.count.min(data.len() / layout.min_record_size());
    let mut positions = Vec::with_capacity(capacity);
    let mut colors = Vec::with_capacity(capacity);
    let mut push = |values: &[f64]| {
        let [x, y, z] = layout.xyz.map(|i| values[i] as f32);
        positions.push([x, y, z]);
        colors.push(layout.color(values));
    };

    let body = &data[header.body..];
    match header.format {
        Format::Ascii => read_ascii(body, &header.elements, &mut push)?,
        Format::BinaryLittleEndian => read_binary(body, &header.elements, false, &mut push)?,
        Format::BinaryBigEndian => read_binary(body, &header.elements, true, &mut push)?,
    }

    tracing::debug!(points = positions.len(), colored = layout.rgb.is_some(), "PLY parsed");
    Ok(PointCloud::new(positions, colors)?)
}

/// Walks elements up to and including `vertex`, passing each vertex's scalar
/// values (indexed by property) to `emit`.
fn read_ascii(body: &[u8], elements: &[Element], emit: &mut dyn FnMut(&[f64])) -> Result<(), PlyError> {
    let text = String::from_utf8_lossy(body);
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    for element in elements {
        let is_vertex = element.name == "vertex";
        for index in 0..element.count {
            let line = lines.next().ok_or_else(|| PlyError::Truncated {
                element: element.name.clone(),
                index,
            })?;
            if !is_vertex {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let mut values = Vec::with_capacity(element.properties.len());
            for property in &element.properties {
                let mut next = || -> Result<f64, PlyError> {
                    let token = tokens.next().ok_or_else(|| PlyError::Truncated {
                        element: element.name.clone(),
                        index,
                    })?;
                    token.parse().map_err(|_| PlyError::BadValue {
                        element: element.name.clone(),
                        token:   token.to_string(),
                    })
                };
                match property {
                    Property::Scalar { .. } => values.push(next()?),
                    Property::List { .. } => {
                        let n = next()? as usize;
                        for _ in 0..n {
                            next()?;
                        }
                        values.push(0.0);
                    }
                }
            }
            emit(&values);
        }
        if is_vertex {
            break;
        }
    }
    Ok(())
}

fn read_binary(
    body: &[u8],
    elements: &[Element],
    big_endian: bool,
    emit: &mut dyn FnMut(&[f64]),
) -> Result<(), PlyError> {
    let mut cursor = 0usize;

    for element in elements {
        let is_vertex = element.name == "vertex";
        let mut values = Vec::with_capacity(element.properties.len());
        for index in 0..element.count {
            let truncated = || PlyError::Truncated {
                element: element.name.clone(),
                index,
            };
            values.clear();
            for property in &element.properties {
                match property {
                    Property::Scalar { kind, .. } => {
                        let bytes = body.get(cursor..cursor + kind.size()).ok_or_else(truncated)?;
                        values.push(kind.decode(bytes, big_endian));
                        cursor += kind.size();
                    }
                    Property::List { count, item } => {
                        let bytes = body.get(cursor..cursor + count.size()).ok_or_else(truncated)?;
                        let n = count.decode(bytes, big_endian) as usize;
                        cursor += count.size() + n * item.size();
                        if cursor > body.len() {
                            return Err(truncated());
                        }
                        values.push(0.0);
                    }
                }
            }
            if is_vertex {
                emit(&values);
            }
        }
        if is_vertex {
            break;
        }
    }
    Ok(())
}
