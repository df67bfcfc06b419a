
//! Checks the attributes of a part before its chunks are read or written.

use tracing::warn;
use crate::error::*;
use crate::math::*;
use crate::meta::Requirements;
use crate::meta::attribute::*;
use crate::meta::part::{Part, Required, Storage};


/// Upper bounds for file contents, to reject files that would exhaust memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limits {

    /// The largest accepted data or display window.
    pub max_image_size: Option<Vec2<usize>>,

    /// The largest accepted tile.
    pub max_tile_size: Option<Vec2<usize>>,
}

/// Files being read are corrected where possible, files being written are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {

    /// Correct the type attribute with a warning, unless strict.
    Read { strict: bool },

    /// Reject any inconsistency.
    Write,
}

/// Coordinates must stay within this bound, so that sizes fit into an `i32`.
const MAX_COORDINATE: i64 = i32::MAX as i64 / 2;


/// Validate a part and compute its chunk geometry.
pub fn validate_part(part: &mut Part, requirements: &Requirements, limits: &Limits, direction: Direction) -> UnitResult {
    validate_type(part, requirements, direction)?;
    validate_required_attributes(part, requirements)?;

    let data_window = part.required(Required::DataWindow)
        .ok_or_else(|| Error::missing_attribute("dataWindow"))?
        .to_integer_bounds()?;

    validate_window(data_window, "data window", limits)?;
    validate_window(part.display_window()?, "display window", limits)?;

    let aspect_ratio = part.pixel_aspect_ratio()?;
    if !(aspect_ratio.is_normal() && (1e-6 ..= 1e6).contains(&aspect_ratio)) {
        return Err(Error::invalid_attribute(format!("pixel aspect ratio {} out of range", aspect_ratio)));
    }

    let screen_window_width = part.screen_window_width()?;
    if !(screen_window_width >= 0.0) {
        return Err(Error::invalid_attribute(format!("screen window width {} is negative", screen_window_width)));
    }

    validate_channels(part.channels()?, data_window)?;

    if part.storage().is_tiled() {
        validate_tiles(part, limits)?;
    }

    if part.storage().is_deep() {
        validate_deep(part)?;
    }

    part.compute_geometry()?;

    if let Some(declared) = part.declared_chunk_count() {
        if declared as i64 != part.chunk_count() {
            return Err(Error::invalid_attribute(format!(
                "chunk count attribute is {}, but the layout has {} chunks", declared, part.chunk_count()
            )));
        }
    }

    Ok(())
}

fn validate_required_attributes(part: &Part, requirements: &Requirements) -> UnitResult {
    let mut required = vec![
        Required::Channels, Required::Compression, Required::DataWindow, Required::DisplayWindow,
        Required::LineOrder, Required::PixelAspectRatio, Required::ScreenWindowCenter,
        Required::ScreenWindowWidth,
    ];

    if part.storage().is_tiled() { required.push(Required::Tiles); }

    if requirements.is_multipart() || requirements.has_deep_data() {
        required.extend([ Required::Name, Required::Type, Required::ChunkCount ]);
    }

    if part.storage().is_deep() { required.push(Required::Version); }

    match required.into_iter().find(|&attribute| part.required(attribute).is_none()) {
        Some(missing) => Err(Error::missing_attribute(String::from_utf8_lossy(missing.name()).into_owned())),
        None => Ok(()),
    }
}

/// The type attribute must name a known storage.
/// Single-part files also declare the storage through the flags,
/// which are trusted when reading.
fn validate_type(part: &mut Part, requirements: &Requirements, direction: Direction) -> UnitResult {
    let declared = match part.type_attribute() {
        None => None,
        Some(text) => Some(Storage::from_type_name(text.as_slice()).ok_or_else(|| {
            Error::invalid_attribute(format!("unknown part type `{}`", text))
        })?),
    };

    let flag_storage = if requirements.is_multipart() || requirements.has_deep_data() { None }
        else if requirements.is_single_part_and_tiled() { Some(Storage::Tiled) }
        else { Some(Storage::ScanLine) };

    match direction {
        Direction::Write => {
            if let Some(declared) = declared {
                if declared != part.storage() {
                    return Err(Error::invalid_attribute(format!(
                        "type attribute `{}` does not match the part storage {:?}",
                        String::from_utf8_lossy(declared.type_name()), part.storage()
                    )));
                }
            }
        },

        Direction::Read { strict } => {
            if let (Some(declared), Some(flag_storage)) = (declared, flag_storage) {
                if declared != flag_storage && strict {
                    return Err(Error::invalid_attribute(format!(
                        "type attribute `{}` disagrees with the version flags",
                        String::from_utf8_lossy(declared.type_name())
                    )));
                }

                if declared != flag_storage {
                    warn!(
                        declared = %String::from_utf8_lossy(declared.type_name()),
                        flags = %String::from_utf8_lossy(flag_storage.type_name()),
                        "type attribute disagrees with the version flags, using the flags"
                    );

                    part.replace_text(Required::Type, Text::from_slice_unchecked(flag_storage.type_name()))?;
                    part.set_storage(flag_storage);
                }
            }

            let single_deep_part = requirements.has_deep_data() && !requirements.is_multipart();
            if single_deep_part && declared.is_some() && !part.storage().is_deep() {
                return Err(Error::invalid_attribute("single-part deep file contains a flat part"));
            }
        },
    }

    Ok(())
}

fn validate_window(window: IntegerBounds, name: &'static str, limits: &Limits) -> UnitResult {
    if !window.is_ordered() {
        return Err(Error::invalid_attribute(format!(
            "{} minimum ({}, {}) exceeds maximum ({}, {})", name,
            window.min.x(), window.min.y(), window.max.x(), window.max.y()
        )));
    }

    let coordinates = [ window.min.x(), window.min.y(), window.max.x(), window.max.y() ];
    if coordinates.iter().any(|&coordinate| (coordinate as i64).abs() > MAX_COORDINATE) {
        return Err(Error::invalid_attribute(format!("{} is too large", name)));
    }

    if let Some(max) = limits.max_image_size {
        let size = window.size();
        if size.width() > max.width() as i64 || size.height() > max.height() as i64 {
            return Err(Error::invalid_attribute(format!(
                "{} of {}x{} exceeds the limit of {}x{}", name,
                size.width(), size.height(), max.width(), max.height()
            )));
        }
    }

    Ok(())
}

fn validate_channels(channels: &ChannelList, data_window: IntegerBounds) -> UnitResult {
    if channels.list.is_empty() {
        return Err(Error::invalid_attribute("at least one channel is required"));
    }

    for pair in channels.list.windows(2) {
        if pair[0].name == pair[1].name {
            return Err(Error::invalid_attribute(format!("duplicate channel `{}`", pair[0].name)));
        }
    }

    let size = data_window.size();

    for channel in &channels.list {
        let Vec2(x_sampling, y_sampling) = channel.sampling;

        if x_sampling < 1 || y_sampling < 1 {
            return Err(Error::invalid_attribute(format!(
                "channel `{}` has sampling ({}, {})", channel.name, x_sampling, y_sampling
            )));
        }

        let (x_sampling, y_sampling) = (x_sampling as i64, y_sampling as i64);

        let origin_aligned = (data_window.min.x() as i64).rem_euclid(x_sampling) == 0
            && (data_window.min.y() as i64).rem_euclid(y_sampling) == 0;

        let extent_aligned = size.width() % x_sampling == 0 && size.height() % y_sampling == 0;

        if !origin_aligned || !extent_aligned {
            return Err(Error::invalid_attribute(format!(
                "data window is not a multiple of the sampling of channel `{}`", channel.name
            )));
        }
    }

    Ok(())
}

fn validate_unit_sampling(part: &Part, storage: &'static str) -> UnitResult {
    for channel in &part.channels()?.list {
        if channel.sampling != Vec2(1, 1) {
            return Err(Error::invalid_attribute(format!(
                "channel `{}` of a {} part must not be subsampled", channel.name, storage
            )));
        }
    }

    Ok(())
}

fn validate_tiles(part: &Part, limits: &Limits) -> UnitResult {
    let description = part.tile_description()
        .ok_or_else(|| Error::missing_attribute("tiles"))?;

    let Vec2(width, height) = description.tile_size;
    if width == 0 || height == 0 {
        return Err(Error::invalid_attribute("tile size must be positive"));
    }

    // sizes are stored as u32 but must fit into the positive i32 range
    if width > i32::MAX as u32 || height > i32::MAX as u32 {
        return Err(Error::invalid_attribute("tile size too large"));
    }

    if let Some(max) = limits.max_tile_size {
        if width as usize > max.width() || height as usize > max.height() {
            return Err(Error::invalid_attribute(format!(
                "tile size {}x{} exceeds the limit of {}x{}", width, height, max.width(), max.height()
            )));
        }
    }

    validate_unit_sampling(part, "tiled")
}

fn validate_deep(part: &Part) -> UnitResult {
    let compression = part.required(Required::Compression)
        .ok_or_else(|| Error::missing_attribute("compression"))?
        .to_compression()?;

    if !compression.supports_deep_data() {
        return Err(Error::invalid_attribute(format!("{} compression does not support deep data", compression)));
    }

    validate_unit_sampling(part, "deep")?;

    match part.version() {
        Some(1) => Ok(()),
        Some(version) => Err(Error::invalid_attribute(format!("deep data version {} is not supported", version))),
        None => Err(Error::missing_attribute("version")),
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::meta::tiles::TileCoordinates;
    use smallvec::smallvec;

    fn channels() -> ChannelList {
        ChannelList::new(smallvec![ ChannelDescription::new("Z", SampleType::F16, false) ])
    }

    fn scan_line_part() -> Part {
        Part::with_required(Storage::ScanLine, channels(), IntegerBounds::from_dimensions(10, 4), Compression::Uncompressed).unwrap()
    }

    fn requirements(parts: &[Part]) -> Requirements {
        Requirements::infer(parts)
    }

    fn validate(part: &mut Part, direction: Direction) -> UnitResult {
        let requirements = requirements(std::slice::from_ref(part));
        validate_part(part, &requirements, &Limits::default(), direction)
    }

    fn error_code(part: &mut Part) -> ErrorCode {
        validate(part, Direction::Read { strict: false }).unwrap_err().code()
    }

    #[test]
    fn valid_scan_line_part(){
        let mut part = scan_line_part();
        validate(&mut part, Direction::Write).unwrap();
        assert_eq!(part.chunk_count(), 4);
    }

    #[test]
    fn rejects_unordered_window(){
        let mut part = scan_line_part();
        part.set_attribute("dataWindow", AttributeValue::IntegerBounds(IntegerBounds::new((5, 0), (4, 3)))).unwrap();
        assert_eq!(error_code(&mut part), ErrorCode::InvalidAttribute);

        let mut part = scan_line_part();
        part.set_attribute("displayWindow", AttributeValue::IntegerBounds(IntegerBounds::new((0, 0), (i32::MAX, 3)))).unwrap();
        assert_eq!(error_code(&mut part), ErrorCode::InvalidAttribute);
    }

    #[test]
    fn respects_limits(){
        let mut part = scan_line_part();
        let requirements = requirements(std::slice::from_ref(&part));
        let limits = Limits { max_image_size: Some(Vec2(8, 8)), max_tile_size: None };
        assert!(validate_part(&mut part, &requirements, &limits, Direction::Read { strict: false }).is_err());
    }

    #[test]
    fn rejects_bad_aspect_ratio(){
        for ratio in [ 0.0, f32::NAN, f32::INFINITY, 1e-9, 1e9 ] {
            let mut part = scan_line_part();
            part.set_attribute("pixelAspectRatio", AttributeValue::F32(ratio)).unwrap();
            assert_eq!(error_code(&mut part), ErrorCode::InvalidAttribute, "{}", ratio);
        }

        let mut part = scan_line_part();
        part.set_attribute("screenWindowWidth", AttributeValue::F32(-1.0)).unwrap();
        assert_eq!(error_code(&mut part), ErrorCode::InvalidAttribute);
    }

    #[test]
    fn rejects_missing_attributes(){
        let mut part = scan_line_part();
        part.remove_attribute("screenWindowCenter");
        assert_eq!(error_code(&mut part), ErrorCode::MissingRequiredAttribute);

        let mut part = Part::with_required(Storage::Tiled, channels(), IntegerBounds::from_dimensions(10, 4), Compression::Uncompressed).unwrap();
        assert_eq!(error_code(&mut part), ErrorCode::MissingRequiredAttribute);
    }

    #[test]
    fn rejects_misaligned_sampling(){
        let subsampled = ChannelList::new(smallvec![ ChannelDescription::new("C", SampleType::F16, false).with_sampling(2, 2) ]);

        let mut part = Part::with_required(Storage::ScanLine, subsampled.clone(), IntegerBounds::from_dimensions(10, 4), Compression::Uncompressed).unwrap();
        validate(&mut part, Direction::Read { strict: false }).unwrap();

        let mut part = Part::with_required(Storage::ScanLine, subsampled.clone(), IntegerBounds::from_dimensions(9, 4), Compression::Uncompressed).unwrap();
        assert_eq!(error_code(&mut part), ErrorCode::InvalidAttribute);

        let mut part = Part::with_required(Storage::ScanLine, subsampled, IntegerBounds::new((-1, 0), (8, 3)), Compression::Uncompressed).unwrap();
        assert_eq!(error_code(&mut part), ErrorCode::InvalidAttribute);

        let zero = ChannelList::new(smallvec![ ChannelDescription::new("C", SampleType::F16, false).with_sampling(0, 1) ]);
        let mut part = Part::with_required(Storage::ScanLine, zero, IntegerBounds::from_dimensions(10, 4), Compression::Uncompressed).unwrap();
        assert_eq!(error_code(&mut part), ErrorCode::InvalidAttribute);
    }

    #[test]
    fn tiled_parts(){
        let mut part = Part::with_required(Storage::Tiled, channels(), IntegerBounds::from_dimensions(10, 4), Compression::Uncompressed).unwrap();
        part.set_attribute("tiles", AttributeValue::TileDescription(TileDescription {
            tile_size: Vec2(4, 4), level_mode: LevelMode::MipMap, rounding_mode: RoundingMode::Up,
        })).unwrap();

        validate(&mut part, Direction::Write).unwrap();
        assert!(part.tile_chunk_index(TileCoordinates { tile_index: Vec2(2, 0), level_index: Vec2(0, 0) }).is_ok());

        let requirements = requirements(std::slice::from_ref(&part));
        let limits = Limits { max_image_size: None, max_tile_size: Some(Vec2(2, 2)) };
        assert!(validate_part(&mut part, &requirements, &limits, Direction::Read { strict: false }).is_err());
    }

    #[test]
    fn deep_parts(){
        let mut part = Part::with_required(Storage::DeepScanLine, channels(), IntegerBounds::from_dimensions(10, 4), Compression::ZIP16).unwrap();
        part.set_attribute("name", AttributeValue::Text(Text::from("deep"))).unwrap();
        part.set_attribute("type", AttributeValue::Text(Text::from("deepscanline"))).unwrap();
        part.set_attribute("version", AttributeValue::I32(1)).unwrap();
        part.set_attribute("chunkCount", AttributeValue::I32(4)).unwrap();

        assert_eq!(error_code(&mut part), ErrorCode::InvalidAttribute);

        part.set_attribute("compression", AttributeValue::Compression(Compression::ZIP1)).unwrap();
        validate(&mut part, Direction::Read { strict: false }).unwrap();

        part.set_attribute("version", AttributeValue::I32(2)).unwrap();
        assert_eq!(error_code(&mut part), ErrorCode::InvalidAttribute);
    }

    #[test]
    fn chunk_count_must_match(){
        let mut part = scan_line_part();
        part.set_attribute("chunkCount", AttributeValue::I32(5)).unwrap();
        assert_eq!(error_code(&mut part), ErrorCode::InvalidAttribute);
    }

    #[test]
    fn type_attribute_is_corrected_on_read(){
        let mut part = scan_line_part();
        part.set_attribute("type", AttributeValue::Text(Text::from("tiledimage"))).unwrap();

        // the part was created as a scan line part, so writing rejects the disagreement
        assert_eq!(validate(&mut part, Direction::Write).unwrap_err().code(), ErrorCode::InvalidAttribute);

        let requirements = Requirements::infer(&[ scan_line_part() ]);
        part.set_storage(Storage::Tiled);
        validate_part(&mut part, &requirements, &Limits::default(), Direction::Read { strict: false }).unwrap();

        assert_eq!(part.storage(), Storage::ScanLine);

        let mut strict = part.clone();
        strict.set_attribute("type", AttributeValue::Text(Text::from("tiledimage"))).unwrap();
        let error = validate_part(&mut strict, &requirements, &Limits::default(), Direction::Read { strict: true }).unwrap_err();
        assert_eq!(error.code(), ErrorCode::InvalidAttribute);

        assert_eq!(part.type_attribute().map(|text| text.to_string()), Some("scanlineimage".to_string()));

        part.set_attribute("type", AttributeValue::Text(Text::from("image"))).unwrap();
        assert_eq!(error_code(&mut part), ErrorCode::InvalidAttribute);
    }
}
