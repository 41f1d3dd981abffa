//! Turns a device path into a populated [`ZoneTable`].

use crate::zbd::backend::ZoneIoctlBackend;
use crate::zbd::error::Error;
use crate::zbd::table::ZoneTable;
use crate::zbd::zone::{Zone, ZoneCondition, ZoneModel, ZoneType};
use tracing::{debug, info};

/// Build a zone table by querying `backend`.
///
/// `configured_zone_size` is the `zone_size` job option (in sectors; may be
/// `0` meaning "derive from the device"). It is mandatory (and must be
/// nonzero) when the device turns out to be non-zoned.
pub fn build_zone_table(backend: &dyn ZoneIoctlBackend, configured_zone_size: u64) -> Result<ZoneTable, Error> {
    let model = backend.query_model()?;
    info!(?model, "discovered zoning model");

    if model.is_zoned() {
        build_from_device_report(backend, model, configured_zone_size)
    } else {
        build_synthetic(backend, configured_zone_size)
    }
}

fn build_from_device_report(
    backend: &dyn ZoneIoctlBackend,
    model: ZoneModel,
    configured_zone_size: u64,
) -> Result<ZoneTable, Error> {
    let mut reported = Vec::new();
    let mut next_sector = 0u64;
    loop {
        let mut batch = Vec::new();
        let n = backend.report_zones(next_sector, 64, &mut batch)?;
        if n == 0 {
            break;
        }
        next_sector = batch.last().map(|z| z.start + z.len).unwrap_or(next_sector);
        reported.extend(batch);
        if n < 64 {
            break;
        }
    }

    if reported.is_empty() {
        return Err(Error::Geometry("device reports a zoned model but no zones".into()));
    }

    let zone_size = reported[0].len;
    if configured_zone_size != 0 && configured_zone_size != zone_size {
        return Err(Error::Geometry(format!(
            "configured zone_size {} does not match device zone_size {}",
            configured_zone_size, zone_size
        )));
    }

    let mut zones = Vec::with_capacity(reported.len());
    for z in &reported {
        if z.len != zone_size {
            return Err(Error::Geometry(format!(
                "zone at sector {} has length {}, expected uniform {}",
                z.start, z.len, zone_size
            )));
        }
        let wp = match z.cond {
            ZoneCondition::NotWp => z.start,
            ZoneCondition::Full => z.start + zone_size,
            _ => {
                if !(z.start <= z.wp && z.wp <= z.start + zone_size) {
                    return Err(Error::Geometry(format!(
                        "zone at sector {} reports wp {} outside [{}, {}]",
                        z.start,
                        z.wp,
                        z.start,
                        z.start + zone_size
                    )));
                }
                z.wp
            }
        };
        zones.push(Zone::new(z.start, z.zone_type, z.cond, wp));
    }

    let nr_zones = zones.len() as u64;
    let sentinel_start = nr_zones * zone_size;
    let table = ZoneTable::from_zones(zone_size, model, zones, sentinel_start);
    table.verify_invariants().map_err(Error::Geometry)?;
    debug!(nr_zones, zone_size, "built zone table from device report");
    Ok(table)
}

fn build_synthetic(backend: &dyn ZoneIoctlBackend, configured_zone_size_bytes: u64) -> Result<ZoneTable, Error> {
    if configured_zone_size_bytes < 512 {
        return Err(Error::Config(
            "zone_size must be configured (>= 512 bytes) for non-zoned devices".into(),
        ));
    }
    let zone_size = configured_zone_size_bytes >> 9;
    let device_size_sectors = backend.device_size_sectors()?;
    let nr_zones = device_size_sectors.div_ceil(zone_size);

    let zones = (0..nr_zones)
        .map(|i| {
            let start = i * zone_size;
            // Synthesized zones start "full"; an up-front reset empties
            // them before writes begin.
            Zone::new(start, ZoneType::SeqwriteReq, ZoneCondition::Empty, start + zone_size)
        })
        .collect();

    let sentinel_start = nr_zones * zone_size;
    let table = ZoneTable::from_zones(zone_size, ZoneModel::None, zones, sentinel_start);
    table.verify_invariants().map_err(Error::Geometry)?;
    debug!(nr_zones, zone_size, "synthesized zone table for non-zoned device");
    Ok(table)
}
