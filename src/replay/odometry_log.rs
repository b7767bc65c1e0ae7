use std::path::Path;

use anyhow::{Context, Result, bail};
use csv::ReaderBuilder;
use nalgebra::Vector3;
use tracing::warn;

use crate::geometry::SE3;
use crate::time::Timestamp;

#[derive(Debug, Clone)]
pub struct OdometryRecord {
    pub stamp: Timestamp,
    pub pose: SE3, // odom -> body
}

/// Load an odometry log.
///
/// CSV format: timestamp_ns, x, y, z, qw, qx, qy, qz. Lines starting with
/// `#` are comments.
pub fn load_odometry_csv<P: AsRef<Path>>(path: P) -> Result<Vec<OdometryRecord>> {
    let path = path.as_ref();
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut records = Vec::new();
    for (line, rec) in rdr.records().enumerate() {
        let rec = rec.with_context(|| format!("{}: bad record", path.display()))?;
        if rec.len() < 8 {
            warn!(
                "{}: skipping record {} with {} fields",
                path.display(),
                line + 1,
                rec.len()
            );
            continue;
        }

        let field = |i: usize| -> Result<f64> {
            rec[i]
                .trim()
                .parse()
                .with_context(|| format!("{}: record {} field {}", path.display(), line + 1, i))
        };

        let stamp: u64 = rec[0]
            .trim()
            .parse()
            .with_context(|| format!("{}: record {} timestamp", path.display(), line + 1))?;
        let position = Vector3::new(field(1)?, field(2)?, field(3)?);
        let (qw, qx, qy, qz) = (field(4)?, field(5)?, field(6)?, field(7)?);
        if qw == 0.0 && qx == 0.0 && qy == 0.0 && qz == 0.0 {
            bail!("{}: record {} has a zero quaternion", path.display(), line + 1);
        }

        records.push(OdometryRecord {
            stamp: Timestamp::from_nanos(stamp),
            pose: SE3::from_quaternion(qw, qx, qy, qz, position),
        });
    }

    Ok(records)
}
