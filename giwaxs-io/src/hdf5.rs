//! HDF5 export of analysis results.
//!
//! Layout: ROI sets are groups holding one subgroup per ROI with scalar
//! attributes; profiles are groups with `x` and `y` datasets; polar images
//! are 2-D datasets.

use crate::{Error, Result};
use giwaxs_core::{GaussianParams, RoiParameters, RoiType};
use hdf5::types::{H5Type, VarLenUnicode};
use hdf5::{File, Group};
use ndarray::{Array2, ArrayView1};
use std::path::Path;
use std::str::FromStr;

const FORMAT_VERSION: &str = "0.1";
const FIT_ATTRS: [&str; 4] = ["fit_amplitude", "fit_center", "fit_sigma", "fit_offset"];

/// Writer for ROI sets, profiles and polar images.
pub struct Hdf5ResultSink {
    file: File,
}

impl Hdf5ResultSink {
    /// Creates (truncates) an HDF5 file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        let value = to_var_len_unicode(FORMAT_VERSION)?;
        file.new_attr::<VarLenUnicode>()
            .create("giwaxs_format_version")?
            .write_scalar(&value)?;
        Ok(Self { file })
    }

    /// Writes a ROI set as `group/roi_NNN` subgroups.
    ///
    /// # Errors
    /// Returns an error if HDF5 I/O fails.
    pub fn write_rois(&self, group: &str, rois: &[RoiParameters]) -> Result<()> {
        let parent = self.file.create_group(group)?;
        for (i, roi) in rois.iter().enumerate() {
            let node = parent.create_group(&format!("roi_{i:03}"))?;
            set_attr(&node, "radius", roi.radius)?;
            set_attr(&node, "width", roi.width)?;
            set_attr(&node, "angle", roi.angle)?;
            set_attr(&node, "angle_std", roi.angle_std)?;
            set_attr(&node, "fitted", u8::from(roi.fitted))?;
            set_attr(&node, "movable", u8::from(roi.movable))?;
            set_attr(&node, "segment", u8::from(roi.roi_type == RoiType::Segment))?;
            if let Some(key) = roi.key {
                set_attr(&node, "key", key)?;
            }
            if let Some(name) = roi.name.as_deref() {
                let value = to_var_len_unicode(name)?;
                node.new_attr::<VarLenUnicode>()
                    .create("name")?
                    .write_scalar(&value)?;
            }
            if let Some(params) = roi.fit_r_parameters {
                for (attr, value) in FIT_ATTRS.iter().zip(params.to_array()) {
                    set_attr(&node, attr, value)?;
                }
            }
        }
        Ok(())
    }

    /// Writes a profile as `name/x` and `name/y`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] if the lengths differ, or an HDF5 error.
    pub fn write_profile<'a>(
        &self,
        name: &str,
        x: ArrayView1<'a, f64>,
        y: ArrayView1<'a, f64>,
    ) -> Result<()> {
        if x.len() != y.len() {
            return Err(Error::InvalidFormat(format!(
                "profile axis has {} points, values have {}",
                x.len(),
                y.len()
            )));
        }
        let group = self.file.create_group(name)?;
        for (label, data) in [("x", x), ("y", y)] {
            let dataset = group.new_dataset::<f64>().shape((data.len(),)).create(label)?;
            dataset.write(data)?;
        }
        Ok(())
    }

    /// Writes a 2-D image dataset.
    ///
    /// # Errors
    /// Returns an error if HDF5 I/O fails.
    pub fn write_image(&self, name: &str, image: &Array2<f64>) -> Result<()> {
        let dataset = self.file.new_dataset::<f64>().shape(image.dim()).create(name)?;
        dataset.write(image.view())?;
        Ok(())
    }
}

/// Reads a ROI set written by [`Hdf5ResultSink::write_rois`].
///
/// # Errors
/// Returns an error if the group or a required attribute is missing.
pub fn read_rois_hdf5<P: AsRef<Path>>(path: P, group: &str) -> Result<Vec<RoiParameters>> {
    let file = File::open(path)?;
    let parent = file.group(group)?;
    let mut names = parent.member_names()?;
    names.sort();

    names
        .iter()
        .map(|name| -> Result<RoiParameters> {
            let node = parent.group(name)?;
            let mut roi = RoiParameters::new(read_attr(&node, "radius")?, read_attr(&node, "width")?)
                .with_angles(read_attr(&node, "angle")?, read_attr(&node, "angle_std")?);
            if let Some(key) = read_attr_opt::<u32>(&node, "key")? {
                roi = roi.with_key(key);
            }
            if let Ok(attr) = node.attr("name") {
                let name: VarLenUnicode = attr.read_scalar()?;
                roi = roi.with_name(name.to_string());
            }
            let fit = FIT_ATTRS
                .iter()
                .map(|attr| read_attr_opt::<f64>(&node, attr))
                .collect::<Result<Vec<_>>>()?;
            if let [Some(a), Some(mu), Some(sigma), Some(b)] = fit[..] {
                roi.fit_r_parameters = Some(GaussianParams::new(a, mu, sigma, b));
            }
            roi = roi
                .with_fitted(read_attr::<u8>(&node, "fitted")? != 0)
                .with_movable(read_attr::<u8>(&node, "movable")? != 0);
            if read_attr::<u8>(&node, "segment")? != 0 {
                roi = roi.with_type(RoiType::Segment);
            }
            Ok(roi)
        })
        .collect()
}

fn set_attr<T: H5Type>(group: &Group, name: &str, value: T) -> Result<()> {
    group.new_attr::<T>().create(name)?.write_scalar(&value)?;
    Ok(())
}

fn read_attr<T: H5Type>(group: &Group, name: &str) -> Result<T> {
    Ok(group.attr(name)?.read_scalar::<T>()?)
}

fn read_attr_opt<T: H5Type>(group: &Group, name: &str) -> Result<Option<T>> {
    match group.attr(name) {
        Ok(attr) => Ok(Some(attr.read_scalar::<T>()?)),
        Err(_) => Ok(None),
    }
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 attribute: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::NamedTempFile;

    #[test]
    fn test_roi_set_survives_file() {
        let file = NamedTempFile::new().unwrap();
        let rois = vec![
            RoiParameters::new(12.0, 3.0).with_key(1).with_name("first"),
            RoiParameters::new(30.0, 6.0)
                .with_key(2)
                .with_fit(GaussianParams::new(4.0, 30.5, 2.0, 0.5)),
        ];
        let sink = Hdf5ResultSink::create(file.path()).unwrap();
        sink.write_rois("rois", &rois).unwrap();
        drop(sink);

        let loaded = read_rois_hdf5(file.path(), "rois").unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].name.as_deref(), Some("first"));
        assert_eq!(loaded[1].key, Some(2));
        assert!(loaded[1].fitted);
        assert_eq!(loaded[1].fit_r_parameters, rois[1].fit_r_parameters);
        assert!((loaded[1].radius - rois[1].radius).abs() < 1e-12);
    }

    #[test]
    fn test_profile_and_image_datasets() {
        let file = NamedTempFile::new().unwrap();
        let sink = Hdf5ResultSink::create(file.path()).unwrap();
        sink.write_profile("radial", array![0.0, 1.0].view(), array![3.0, 4.0].view())
            .unwrap();
        sink.write_image("polar", &array![[1.0, 2.0], [3.0, 4.0]]).unwrap();
        assert!(sink
            .write_profile("bad", array![0.0].view(), array![1.0, 2.0].view())
            .is_err());
        drop(sink);

        let file = File::open(file.path()).unwrap();
        let y: Vec<f64> = file.dataset("radial/y").unwrap().read_raw().unwrap();
        assert_eq!(y, vec![3.0, 4.0]);
        assert_eq!(file.dataset("polar").unwrap().shape(), vec![2, 2]);
    }
}
