//! GeoTIFF reading and writing on top of the `tiff` crate
//!
//! Georeferencing is carried by the ModelPixelScale (33550), ModelTiepoint
//! (33922) and GeoKeyDirectory (34735) tags. Multi-band images are read as
//! pixel-interleaved samples.

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster, RasterElement};
use ndarray::Array2;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{ColorType, Gray32Float, Gray8, RGB32Float, RGBA32Float};
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

const TAG_PIXEL_SCALE: u16 = 33550;
const TAG_TIEPOINT: u16 = 33922;
const TAG_GEOKEYS: u16 = 34735;

const KEY_MODEL_TYPE: u32 = 1024;
const KEY_GEOGRAPHIC_TYPE: u32 = 2048;
const KEY_PROJECTED_TYPE: u32 = 3072;

/// Georeferenced band stack decoded from one TIFF
pub struct DecodedImage {
    pub bands: Vec<Array2<f64>>,
    pub transform: GeoTransform,
    pub crs: Option<CRS>,
}

fn tiff_err(context: &str) -> impl Fn(tiff::TiffError) -> Error + '_ {
    move |e| Error::Format(format!("{}: {}", context, e))
}

/// Read every band of a GeoTIFF file
pub fn read_bands<P: AsRef<Path>>(path: P) -> Result<DecodedImage> {
    let file = File::open(path.as_ref())?;
    decode_bands(BufReader::new(file))
}

/// Read a single band of a GeoTIFF file into a raster (band 0 when `None`)
pub fn read_geotiff<T, P>(path: P, band: Option<usize>) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let image = read_bands(path)?;
    let index = band.unwrap_or(0);
    let count = image.bands.len();
    let data = image
        .bands
        .into_iter()
        .nth(index)
        .ok_or_else(|| Error::MissingBand(format!("band {} of {}", index, count)))?;

    let mut raster = Raster::from_array(data.mapv(T::from_f64));
    raster.set_transform(image.transform);
    raster.set_crs(image.crs);
    Ok(raster)
}

fn decode_bands<R: Read + Seek>(reader: R) -> Result<DecodedImage> {
    let mut decoder = Decoder::new(reader)
        .map_err(tiff_err("TIFF decode error"))?
        .with_limits(Limits::unlimited());

    let (width, height) = decoder
        .dimensions()
        .map_err(tiff_err("Cannot read dimensions"))?;
    let (rows, cols) = (height as usize, width as usize);
    if rows == 0 || cols == 0 {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }

    let samples = match decoder.read_image().map_err(tiff_err("Cannot read image data"))? {
        DecodingResult::F32(buf) => buf.into_iter().map(f64::from).collect::<Vec<_>>(),
        DecodingResult::F64(buf) => buf,
        DecodingResult::U8(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I16(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I32(buf) => buf.into_iter().map(f64::from).collect(),
        _ => {
            return Err(Error::UnsupportedDataType(
                "Unsupported TIFF sample format".to_string(),
            ))
        }
    };

    let pixels = rows * cols;
    if samples.len() % pixels != 0 || samples.is_empty() {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }
    let band_count = samples.len() / pixels;

    let bands = (0..band_count)
        .map(|b| {
            let values: Vec<f64> = samples.iter().skip(b).step_by(band_count).copied().collect();
            Array2::from_shape_vec((rows, cols), values).map_err(|e| Error::Other(e.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;

    let transform = read_geotransform(&mut decoder).unwrap_or_default();
    let crs = read_crs(&mut decoder);

    Ok(DecodedImage {
        bands,
        transform,
        crs,
    })
}

fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<GeoTransform> {
    let scale = decoder
        .get_tag_f64_vec(Tag::Unknown(TAG_PIXEL_SCALE))
        .map_err(|_| Error::Format("No pixel scale tag".into()))?;
    let tiepoint = decoder
        .get_tag_f64_vec(Tag::Unknown(TAG_TIEPOINT))
        .map_err(|_| Error::Format("No tiepoint tag".into()))?;

    if scale.len() < 2 || tiepoint.len() < 6 {
        return Err(Error::Format("Cannot determine geotransform".into()));
    }

    // tiepoint: [I, J, K, X, Y, Z], scale: [ScaleX, ScaleY, ScaleZ]
    let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
    let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
    Ok(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]))
}

fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<CRS> {
    let keys = decoder.get_tag_u32_vec(Tag::Unknown(TAG_GEOKEYS)).ok()?;
    // header is 4 shorts, then (key, location, count, value) entries
    keys.get(4..)?
        .chunks_exact(4)
        .find(|entry| {
            (entry[0] == KEY_GEOGRAPHIC_TYPE || entry[0] == KEY_PROJECTED_TYPE)
                && entry[1] == 0
                && entry[3] != 32767
        })
        .map(|entry| CRS::from_epsg(entry[3]))
}

fn geokeys(crs: Option<&CRS>) -> Vec<u16> {
    let epsg = crs.and_then(|c| c.epsg()).and_then(|c| u16::try_from(c).ok());
    let geographic = crs.map_or(false, CRS::is_geographic);
    let model_type = if geographic { 2 } else { 1 };

    let mut keys = vec![
        1, 1, 0, 2, // version 1.1.0, key count patched below
        KEY_MODEL_TYPE as u16, 0, 1, model_type,
        1025, 0, 1, 1, // RasterPixelIsArea
    ];
    if let Some(code) = epsg {
        let key = if geographic { KEY_GEOGRAPHIC_TYPE } else { KEY_PROJECTED_TYPE };
        keys.extend_from_slice(&[key as u16, 0, 1, code]);
    }
    keys[3] = ((keys.len() - 4) / 4) as u16;
    keys
}

fn encode<W, C>(
    writer: W,
    cols: usize,
    rows: usize,
    transform: &GeoTransform,
    crs: Option<&CRS>,
    data: &[C::Inner],
) -> Result<()>
where
    W: Write + Seek,
    C: ColorType,
    [C::Inner]: tiff::encoder::TiffValue,
{
    let mut encoder = TiffEncoder::new(writer).map_err(tiff_err("TIFF encoder error"))?;
    let mut image = encoder
        .new_image::<C>(cols as u32, rows as u32)
        .map_err(tiff_err("Cannot create TIFF image"))?;

    let scale = [transform.pixel_width, transform.pixel_height.abs(), 0.0];
    image
        .encoder()
        .write_tag(Tag::Unknown(TAG_PIXEL_SCALE), &scale[..])
        .map_err(tiff_err("Cannot write scale tag"))?;

    let tiepoint = [0.0, 0.0, 0.0, transform.origin_x, transform.origin_y, 0.0];
    image
        .encoder()
        .write_tag(Tag::Unknown(TAG_TIEPOINT), &tiepoint[..])
        .map_err(tiff_err("Cannot write tiepoint tag"))?;

    let keys = geokeys(crs);
    image
        .encoder()
        .write_tag(Tag::Unknown(TAG_GEOKEYS), keys.as_slice())
        .map_err(tiff_err("Cannot write geokey tag"))?;

    image
        .write_data(data)
        .map_err(tiff_err("Cannot write image data"))?;
    Ok(())
}

fn create<P: AsRef<Path>>(path: P) -> Result<BufWriter<File>> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(BufWriter::new(File::create(path.as_ref())?))
}

/// Write a raster as a 32-bit float GeoTIFF; no-data cells become NaN
pub fn write_geotiff<T, P>(raster: &Raster<T>, path: P) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let data: Vec<f32> = raster
        .data()
        .iter()
        .map(|&v| {
            if raster.is_nodata(v) {
                f32::NAN
            } else {
                num_traits::cast(v).unwrap_or(f32::NAN)
            }
        })
        .collect();
    let (rows, cols) = raster.shape();
    encode::<_, Gray32Float>(create(path)?, cols, rows, raster.transform(), raster.crs(), &data)
}

/// Write a class-label raster as an 8-bit GeoTIFF
pub fn write_class_geotiff<P: AsRef<Path>>(raster: &Raster<u8>, path: P) -> Result<()> {
    let data: Vec<u8> = raster.data().iter().copied().collect();
    let (rows, cols) = raster.shape();
    encode::<_, Gray8>(create(path)?, cols, rows, raster.transform(), raster.crs(), &data)
}

/// Write 3 (RGB) or 4 (RGBA) co-registered bands as one interleaved float GeoTIFF
pub fn write_multiband<P: AsRef<Path>>(bands: &[&Raster<f64>], path: P) -> Result<()> {
    let Some(first) = bands.first() else {
        return Err(Error::Validation("no bands to write".into()));
    };
    for band in bands {
        first.same_grid(*band)?;
    }

    let (rows, cols) = first.shape();
    let mut data = Vec::with_capacity(rows * cols * bands.len());
    for ((r, c), _) in first.data().indexed_iter() {
        data.extend(bands.iter().map(|b| b.data()[(r, c)] as f32));
    }

    let writer = create(path)?;
    match bands.len() {
        3 => encode::<_, RGB32Float>(writer, cols, rows, first.transform(), first.crs(), &data),
        4 => encode::<_, RGBA32Float>(writer, cols, rows, first.transform(), first.crs(), &data),
        n => Err(Error::UnsupportedDataType(format!(
            "cannot write {} interleaved bands (3 or 4 supported)",
            n
        ))),
    }
}
