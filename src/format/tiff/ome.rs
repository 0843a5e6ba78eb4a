//! OME-XML metadata model.
//!
//! The exported container carries one OME `Image` per selected
//! (Position, Scene) combination. Each image holds its planes in
//! `XYZCT` order starting at the IFD named by its `TiffData` element.
//!
//! ```xml
//! <OME xmlns="http://www.openmicroscopy.org/Schemas/OME/2016-06">
//!   <Image ID="Image:0" Name="Position 1">
//!     <Description>Exported from ND2 file: cells.nd2</Description>
//!     <Pixels DimensionOrder="XYZCT" Type="uint16" SizeX="512" ...>
//!       <Channel ID="Channel:0:0" Name="DAPI" SamplesPerPixel="1"/>
//!       <TiffData IFD="0" PlaneCount="3"/>
//!       <Plane TheZ="0" TheC="0" TheT="0" DeltaT="12.5" DeltaTUnit="ms"/>
//!     </Pixels>
//!   </Image>
//!   <StructuredAnnotations>
//!     <MapAnnotation ID="Annotation:0" Namespace="nd2-export/source-indices">
//!       <Value><M K="Z">0,5,9</M></Value>
//!     </MapAnnotation>
//!   </StructuredAnnotations>
//! </OME>
//! ```

use std::str::FromStr;

use crate::axes::{AxisKind, Calibration, ChannelInfo, PixelType};
use crate::error::TiffError;

/// OME schema namespace written to the root element.
pub const OME_NAMESPACE: &str = "http://www.openmicroscopy.org/Schemas/OME/2016-06";

/// Namespace of the map annotation listing selected source indices.
pub const SOURCE_INDICES_NAMESPACE: &str = "nd2-export/source-indices";

/// Prefix of the description written to every image.
pub const DESCRIPTION_PREFIX: &str = "Exported from ND2 file: ";

// =============================================================================
// Model
// =============================================================================

/// One `Plane` element.
#[derive(Debug, Clone, PartialEq)]
pub struct OmePlane {
    pub the_z: usize,
    pub the_c: usize,
    pub the_t: usize,

    /// Time since acquisition start in milliseconds
    pub delta_t_ms: Option<f64>,
}

/// One `Image` element with its `Pixels`.
#[derive(Debug, Clone, PartialEq)]
pub struct OmeImage {
    pub name: String,
    pub size_x: u32,
    pub size_y: u32,
    pub size_z: usize,
    pub size_c: usize,
    pub size_t: usize,
    pub pixel_type: PixelType,
    pub calibration: Calibration,
    pub channels: Vec<ChannelInfo>,
    pub planes: Vec<OmePlane>,

    /// IFD index of the image's first plane
    pub first_ifd: usize,
}

impl OmeImage {
    /// Number of planes in the image.
    pub fn plane_count(&self) -> usize {
        self.size_z * self.size_c * self.size_t
    }

    /// IFD index of plane (z, c, t) under `XYZCT` ordering.
    pub fn ifd_index(&self, z: usize, c: usize, t: usize) -> usize {
        self.first_ifd + z + self.size_z * (c + self.size_c * t)
    }
}

/// A complete OME-XML document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OmeDocument {
    /// Description shared by all images
    pub description: Option<String>,

    pub images: Vec<OmeImage>,

    /// Selected source indices per axis, in canonical order
    pub source_indices: Vec<(AxisKind, Vec<usize>)>,
}

// =============================================================================
// Serialization
// =============================================================================

impl OmeDocument {
    /// Serialize to OME-XML.
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str(&format!(
            "<OME xmlns=\"{}\" Creator=\"nd2-export {}\">\n",
            OME_NAMESPACE,
            env!("CARGO_PKG_VERSION")
        ));

        let annotated = !self.source_indices.is_empty();

        for (i, image) in self.images.iter().enumerate() {
            xml.push_str(&format!(
                "  <Image ID=\"Image:{}\" Name=\"{}\">\n",
                i,
                escape_xml(&image.name)
            ));
            if let Some(description) = &self.description {
                xml.push_str(&format!(
                    "    <Description>{}</Description>\n",
                    escape_xml(description)
                ));
            }
            write_pixels(&mut xml, i, image);
            if annotated {
                xml.push_str("    <AnnotationRef ID=\"Annotation:0\"/>\n");
            }
            xml.push_str("  </Image>\n");
        }

        if annotated {
            xml.push_str("  <StructuredAnnotations>\n");
            xml.push_str(&format!(
                "    <MapAnnotation ID=\"Annotation:0\" Namespace=\"{}\">\n",
                SOURCE_INDICES_NAMESPACE
            ));
            xml.push_str("      <Value>\n");
            for (kind, indices) in &self.source_indices {
                xml.push_str(&format!(
                    "        <M K=\"{}\">{}</M>\n",
                    kind,
                    join_indices(indices)
                ));
            }
            xml.push_str("      </Value>\n");
            xml.push_str("    </MapAnnotation>\n");
            xml.push_str("  </StructuredAnnotations>\n");
        }

        xml.push_str("</OME>\n");
        xml
    }
}

fn write_pixels(xml: &mut String, image_index: usize, image: &OmeImage) {
    let mut attrs = format!(
        "ID=\"Pixels:{}\" DimensionOrder=\"XYZCT\" Type=\"{}\" SizeX=\"{}\" SizeY=\"{}\" \
         SizeZ=\"{}\" SizeC=\"{}\" SizeT=\"{}\" BigEndian=\"false\" Interleaved=\"false\"",
        image_index,
        image.pixel_type.ome_name(),
        image.size_x,
        image.size_y,
        image.size_z,
        image.size_c,
        image.size_t
    );

    let cal = &image.calibration;
    for (name, value) in [
        ("PhysicalSizeX", cal.physical_size_x),
        ("PhysicalSizeY", cal.physical_size_y),
        ("PhysicalSizeZ", cal.physical_size_z),
    ] {
        if let Some(value) = value {
            attrs.push_str(&format!(" {}=\"{}\" {}Unit=\"µm\"", name, value, name));
        }
    }
    if let Some(increment) = cal.time_increment {
        attrs.push_str(&format!(
            " TimeIncrement=\"{}\" TimeIncrementUnit=\"s\"",
            increment
        ));
    }

    xml.push_str(&format!("    <Pixels {}>\n", attrs));

    for (c, channel) in image.channels.iter().enumerate() {
        let mut channel_attrs = format!(
            "ID=\"Channel:{}:{}\" Name=\"{}\" SamplesPerPixel=\"1\"",
            image_index,
            c,
            escape_xml(&channel.name)
        );
        if let Some(color) = channel.color {
            channel_attrs.push_str(&format!(" Color=\"{}\"", rgb_to_ome_color(color)));
        }
        if let Some(wavelength) = channel.emission_wavelength {
            channel_attrs.push_str(&format!(
                " EmissionWavelength=\"{}\" EmissionWavelengthUnit=\"nm\"",
                wavelength
            ));
        }
        xml.push_str(&format!("      <Channel {}/>\n", channel_attrs));
    }

    xml.push_str(&format!(
        "      <TiffData IFD=\"{}\" PlaneCount=\"{}\"/>\n",
        image.first_ifd,
        image.plane_count()
    ));

    for plane in &image.planes {
        let mut plane_attrs = format!(
            "TheZ=\"{}\" TheC=\"{}\" TheT=\"{}\"",
            plane.the_z, plane.the_c, plane.the_t
        );
        if let Some(delta) = plane.delta_t_ms {
            plane_attrs.push_str(&format!(" DeltaT=\"{}\" DeltaTUnit=\"ms\"", delta));
        }
        xml.push_str(&format!("      <Plane {}/>\n", plane_attrs));
    }

    xml.push_str("    </Pixels>\n");
}

/// Packed 0xRRGGBB to the signed RGBA integer OME uses.
fn rgb_to_ome_color(rgb: u32) -> i32 {
    (((rgb & 0x00FF_FFFF) << 8) | 0xFF) as i32
}

fn ome_color_to_rgb(value: i64) -> u32 {
    (value as u32) >> 8
}

fn join_indices(indices: &[usize]) -> String {
    indices
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Escape special XML characters.
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

// =============================================================================
// Parsing
// =============================================================================

impl OmeDocument {
    /// Parse OME-XML.
    ///
    /// Element names are matched without regard to namespace so that files
    /// from other writers with a different schema version still parse.
    pub fn parse(xml: &str) -> Result<Self, TiffError> {
        let doc = roxmltree::Document::parse(xml)
            .map_err(|e| TiffError::InvalidOmeXml(format!("XML parse error: {}", e)))?;

        let root = doc.root_element();
        if root.tag_name().name() != "OME" {
            return Err(TiffError::InvalidOmeXml(
                "root element must be <OME>".to_string(),
            ));
        }

        let mut document = OmeDocument::default();

        for image in root
            .children()
            .filter(|n| n.is_element() && n.tag_name().name() == "Image")
        {
            if document.description.is_none() {
                document.description = child(&image, "Description")
                    .and_then(|n| n.text())
                    .map(|t| t.trim().to_string());
            }
            document.images.push(parse_image(&image)?);
        }

        if document.images.is_empty() {
            return Err(TiffError::InvalidOmeXml("no <Image> elements".to_string()));
        }

        let annotation = root
            .descendants()
            .filter(|n| n.is_element() && n.tag_name().name() == "MapAnnotation")
            .find(|n| n.attribute("Namespace") == Some(SOURCE_INDICES_NAMESPACE));

        if let Some(annotation) = annotation {
            for entry in annotation
                .descendants()
                .filter(|n| n.is_element() && n.tag_name().name() == "M")
            {
                let Some(key) = entry.attribute("K") else {
                    continue;
                };
                let kind = AxisKind::from_str(key).map_err(|_| {
                    TiffError::InvalidOmeXml(format!("unknown axis '{}' in source indices", key))
                })?;
                let indices = parse_index_list(entry.text().unwrap_or(""))?;
                document.source_indices.push((kind, indices));
            }
            document.source_indices.sort_by_key(|(kind, _)| *kind);
        }

        Ok(document)
    }
}

fn parse_image(image: &roxmltree::Node) -> Result<OmeImage, TiffError> {
    let pixels = child(image, "Pixels")
        .ok_or_else(|| TiffError::InvalidOmeXml("<Image> without <Pixels>".to_string()))?;

    let order: String = required(&pixels, "DimensionOrder")?;
    if order != "XYZCT" {
        return Err(TiffError::UnsupportedLayout(format!(
            "DimensionOrder {}",
            order
        )));
    }

    let type_name: String = required(&pixels, "Type")?;
    let pixel_type = PixelType::from_ome_name(&type_name)
        .ok_or_else(|| TiffError::UnsupportedLayout(format!("pixel type {}", type_name)))?;

    let calibration = Calibration {
        physical_size_x: quantity(&pixels, "PhysicalSizeX", "µm", micrometers_per)?,
        physical_size_y: quantity(&pixels, "PhysicalSizeY", "µm", micrometers_per)?,
        physical_size_z: quantity(&pixels, "PhysicalSizeZ", "µm", micrometers_per)?,
        time_increment: quantity(&pixels, "TimeIncrement", "s", seconds_per)?,
    };

    let mut channels = Vec::new();
    let mut planes = Vec::new();
    let mut first_ifd = None;

    for node in pixels.children().filter(|n| n.is_element()) {
        match node.tag_name().name() {
            "Channel" => {
                let mut channel = ChannelInfo::placeholder(channels.len());
                if let Some(name) = node.attribute("Name") {
                    channel.name = name.to_string();
                }
                channel.emission_wavelength = optional(&node, "EmissionWavelength")?;
                channel.color = optional::<i64>(&node, "Color")?.map(ome_color_to_rgb);
                channels.push(channel);
            }
            "TiffData" => {
                if first_ifd.is_none() {
                    first_ifd = Some(optional(&node, "IFD")?.unwrap_or(0));
                }
            }
            "Plane" => planes.push(OmePlane {
                the_z: required(&node, "TheZ")?,
                the_c: required(&node, "TheC")?,
                the_t: required(&node, "TheT")?,
                delta_t_ms: quantity(&node, "DeltaT", "s", milliseconds_per)?,
            }),
            _ => {}
        }
    }

    let size_z: usize = required(&pixels, "SizeZ")?;
    let size_c: usize = required(&pixels, "SizeC")?;
    let size_t: usize = required(&pixels, "SizeT")?;
    let first_ifd = first_ifd.unwrap_or(0);

    // plane_count() and ifd_index() rely on this sum fitting
    size_z
        .checked_mul(size_c)
        .and_then(|n| n.checked_mul(size_t))
        .and_then(|n| n.checked_add(first_ifd))
        .ok_or_else(|| {
            TiffError::InvalidOmeXml(format!(
                "{}x{}x{} planes from IFD {} overflow the plane count",
                size_z, size_c, size_t, first_ifd
            ))
        })?;

    Ok(OmeImage {
        name: image.attribute("Name").unwrap_or_default().to_string(),
        size_x: required(&pixels, "SizeX")?,
        size_y: required(&pixels, "SizeY")?,
        size_z,
        size_c,
        size_t,
        pixel_type,
        calibration,
        channels,
        planes,
        first_ifd,
    })
}

fn child<'a, 'input>(
    node: &roxmltree::Node<'a, 'input>,
    name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn optional<T: FromStr>(node: &roxmltree::Node, name: &str) -> Result<Option<T>, TiffError> {
    match node.attribute(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            TiffError::InvalidOmeXml(format!(
                "invalid {} attribute on <{}>: '{}'",
                name,
                node.tag_name().name(),
                raw
            ))
        }),
    }
}

fn required<T: FromStr>(node: &roxmltree::Node, name: &str) -> Result<T, TiffError> {
    optional(node, name)?.ok_or_else(|| {
        TiffError::InvalidOmeXml(format!(
            "missing {} attribute on <{}>",
            name,
            node.tag_name().name()
        ))
    })
}

/// Read a numeric attribute and convert it from the unit named by its
/// `<name>Unit` attribute, or from `default_unit` when that is absent.
fn quantity(
    node: &roxmltree::Node,
    name: &str,
    default_unit: &str,
    scale: fn(&str) -> Option<f64>,
) -> Result<Option<f64>, TiffError> {
    let Some(value) = optional::<f64>(node, name)? else {
        return Ok(None);
    };
    let unit_attr = format!("{}Unit", name);
    let unit = node
        .attribute(unit_attr.as_str())
        .map_or(default_unit, str::trim);
    let factor = scale(unit).ok_or_else(|| {
        TiffError::UnsupportedLayout(format!("{} \"{}\"", unit_attr, unit))
    })?;
    Ok(Some(value * factor))
}

fn micrometers_per(unit: &str) -> Option<f64> {
    match unit {
        "pm" => Some(1e-6),
        "Å" => Some(1e-4),
        "nm" => Some(1e-3),
        "µm" | "μm" | "um" => Some(1.0),
        "mm" => Some(1e3),
        "cm" => Some(1e4),
        "m" => Some(1e6),
        _ => None,
    }
}

fn seconds_per(unit: &str) -> Option<f64> {
    match unit {
        "ns" => Some(1e-9),
        "µs" | "μs" | "us" => Some(1e-6),
        "ms" => Some(1e-3),
        "s" => Some(1.0),
        "min" => Some(60.0),
        "h" => Some(3600.0),
        _ => None,
    }
}

fn milliseconds_per(unit: &str) -> Option<f64> {
    match unit {
        "ns" => Some(1e-6),
        "µs" | "μs" | "us" => Some(1e-3),
        "ms" => Some(1.0),
        "s" => Some(1e3),
        "min" => Some(6e4),
        "h" => Some(3.6e6),
        _ => None,
    }
}

fn parse_index_list(text: &str) -> Result<Vec<usize>, TiffError> {
    text.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse()
                .map_err(|_| TiffError::InvalidOmeXml(format!("invalid source index '{}'", t)))
        })
        .collect()
}
