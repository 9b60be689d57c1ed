//! CSV writers for profiles, polar images and ROI tables.

use crate::{Error, Result};
use giwaxs_algorithms::AngularProfile;
use giwaxs_core::RoiParameters;
use ndarray::{Array2, ArrayView1};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Writer for analysis results as CSV.
pub struct CsvWriter {
    writer: BufWriter<File>,
}

impl CsvWriter {
    /// Creates a new file writer.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        Ok(Self { writer })
    }

    /// Writes equally long columns under a header line.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] if the columns differ in length.
    pub fn write_columns(&mut self, headers: &[&str], columns: &[ArrayView1<'_, f64>]) -> Result<()> {
        let len = columns.first().map_or(0, ArrayView1::len);
        if headers.len() != columns.len() || columns.iter().any(|c| c.len() != len) {
            return Err(Error::InvalidFormat(
                "CSV columns must match the header and share one length".to_string(),
            ));
        }
        writeln!(self.writer, "{}", headers.join(","))?;
        for i in 0..len {
            let row: Vec<String> = columns.iter().map(|c| c[i].to_string()).collect();
            writeln!(self.writer, "{}", row.join(","))?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Writes a profile as `x,y` rows.
    ///
    /// # Errors
    /// Returns an error if the lengths differ or writing fails.
    pub fn write_profile<'a>(&mut self, x: ArrayView1<'a, f64>, y: ArrayView1<'a, f64>) -> Result<()> {
        self.write_columns(&["x", "y"], &[x, y])
    }

    /// Writes an angular profile in degrees with per-bin pixel counts.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_angular_profile(&mut self, profile: &AngularProfile) -> Result<()> {
        writeln!(self.writer, "phi_deg,intensity,mean,counts")?;
        let degrees = profile.phi_degrees();
        let mean = profile.mean();
        for (((phi, sum), m), count) in degrees
            .iter()
            .zip(&profile.intensity)
            .zip(&mean)
            .zip(&profile.counts)
        {
            writeln!(self.writer, "{phi},{sum},{m},{count}")?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Writes an image, one comma-separated line per row.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_image(&mut self, image: &Array2<f64>) -> Result<()> {
        for row in image.rows() {
            let line: Vec<String> = row.iter().map(ToString::to_string).collect();
            writeln!(self.writer, "{}", line.join(","))?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Writes one line per ROI; fit columns are empty for unfitted ROIs.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_rois(&mut self, rois: &[RoiParameters]) -> Result<()> {
        writeln!(
            self.writer,
            "key,name,radius,width,angle,angle_std,fitted,amplitude,center,sigma,offset"
        )?;
        for roi in rois {
            let key = roi.key.map(|k| k.to_string()).unwrap_or_default();
            let name = roi.name.as_deref().unwrap_or("").replace(',', ";");
            let fit = roi.fit_r_parameters.map_or_else(
                || ",,,".to_string(),
                |p| format!("{},{},{},{}", p.amplitude, p.center, p.sigma, p.offset),
            );
            writeln!(
                self.writer,
                "{key},{name},{},{},{},{},{},{fit}",
                roi.radius, roi.width, roi.angle, roi.angle_std, roi.fitted
            )?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Flushes the writer.
    ///
    /// # Errors
    /// Returns an error if flushing fails.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use giwaxs_core::GaussianParams;
    use ndarray::{array, Array1};
    use tempfile::NamedTempFile;

    #[test]
    fn test_write_profile_csv() {
        let file = NamedTempFile::new().unwrap();
        let mut writer = CsvWriter::create(file.path()).unwrap();
        writer
            .write_profile(array![0.0, 0.5].view(), array![1.5, 2.25].view())
            .unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(content, "x,y\n0,1.5\n0.5,2.25\n");
    }

    #[test]
    fn test_column_length_mismatch() {
        let file = NamedTempFile::new().unwrap();
        let mut writer = CsvWriter::create(file.path()).unwrap();
        let result = writer.write_profile(array![0.0].view(), Array1::zeros(2).view());
        assert!(matches!(result, Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_write_image_rows() {
        let file = NamedTempFile::new().unwrap();
        let mut writer = CsvWriter::create(file.path()).unwrap();
        writer.write_image(&array![[1.0, 2.0], [3.0, 4.0]]).unwrap();
        let content = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(content, "1,2\n3,4\n");
    }

    #[test]
    fn test_write_rois_table() {
        let file = NamedTempFile::new().unwrap();
        let mut writer = CsvWriter::create(file.path()).unwrap();
        let rois = vec![
            RoiParameters::new(10.0, 2.0).with_key(3).with_name("ring, inner"),
            RoiParameters::new(20.0, 4.0).with_fit(GaussianParams::new(5.0, 20.5, 1.5, 0.25)),
        ];
        writer.write_rois(&rois).unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("3,ring; inner,10,2,"));
        assert!(lines[1].ends_with(",false,,,,"));
        assert!(lines[2].ends_with(",true,5,20.5,1.5,0.25"));
    }
}
