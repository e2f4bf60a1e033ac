use super::arrays::Proxies;
use super::engine::Engine;
use super::necessity::NecessityCache;
use super::stats::TokenStats;
use crate::error::Error;
use crate::tokens::Vocab;
use byteorder::LE;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
use roaring::RoaringBitmap;
use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Read;
use std::io::Write;
use std::path::Path;

/// little-endian, self-describing, version-checked
const MAGIC: &[u8; 4] = b"SMEE";
const VERSION: u32 = 3;

impl Engine {
    /// write the snapshot atomically: serialize to a sibling temp file, then
    /// rename over the target
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let tmp = path.with_extension("tmp");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        {
            let mut w = BufWriter::new(File::create(&tmp)?);
            self.serialize(&mut w)?;
            w.flush()?;
        }
        std::fs::rename(&tmp, path)?;
        log::info!("{:<32}{}", "saved snapshot", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let mut r = BufReader::new(File::open(path)?);
        let engine = Self::deserialize(&mut r)?;
        log::info!(
            "{:<32}{} tokens, {} matches",
            "loaded snapshot",
            engine.vocab.len(),
            engine.total_matches
        );
        Ok(engine)
    }

    fn serialize<W: Write>(&self, w: &mut W) -> Result<(), Error> {
        w.write_all(MAGIC)?;
        w.write_u32::<LE>(VERSION)?;
        w.write_u64::<LE>(self.placements.len() as u64)?;
        w.write_u64::<LE>(self.vocab.len() as u64)?;
        w.write_u64::<LE>(self.total_matches)?;

        for &p in &self.placements {
            w.write_i8(p)?;
        }
        write_i16s(w, &self.proxies.item_count)?;
        write_i16s(w, &self.proxies.component_count)?;
        write_i16s(w, &self.proxies.completed_item_count)?;
        write_i16s(w, &self.proxies.unit_count)?;
        write_i16s(w, &self.proxies.two_star_count)?;
        write_i16s(w, &self.proxies.three_star_count)?;
        for &g in &self.proxies.unit_gold_value {
            w.write_i32::<LE>(g)?;
        }

        write_bitmap(w, &self.all_players)?;

        for (_, token) in self.vocab.iter() {
            write_str(w, token)?;
        }
        for id in 0..self.vocab.len() {
            write_str(w, self.vocab.raw_label(id))?;
        }

        for stats in &self.tokens {
            if stats.bitmap.is_empty() {
                w.write_u32::<LE>(0)?;
            } else {
                write_bitmap(w, &stats.bitmap)?;
            }
            w.write_i64::<LE>(stats.placement_sum)?;
            w.write_i32::<LE>(stats.count as i32)?;
        }

        write_f32s(w, &self.necessity.tau)?;
        write_f32s(w, &self.necessity.ci95_low)?;
        write_f32s(w, &self.necessity.ci95_high)?;
        write_f32s(w, &self.necessity.se)?;
        write_f32s(w, &self.necessity.raw_tau)?;
        write_f32s(w, &self.necessity.frac_trimmed)?;
        write_f32s(w, &self.necessity.e_p01)?;
        write_f32s(w, &self.necessity.e_p99)?;
        write_i32s(w, &self.necessity.n_treated)?;
        write_i32s(w, &self.necessity.n_control)?;
        write_i32s(w, &self.necessity.n_used)?;
        w.write_all(&self.necessity.scope_min_star)?;
        Ok(())
    }

    fn deserialize<R: Read>(r: &mut R) -> Result<Self, Error> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(Error::SnapshotCorrupt(format!("bad magic {:?}", magic)));
        }
        let version = r.read_u32::<LE>()?;
        if version != VERSION {
            return Err(Error::SnapshotVersionMismatch {
                found: version,
                expected: VERSION,
            });
        }

        let n_place = r.read_u64::<LE>()? as usize;
        let n_tokens = r.read_u64::<LE>()? as usize;
        let total_matches = r.read_u64::<LE>()?;

        let mut placements = vec![0i8; n_place];
        for p in placements.iter_mut() {
            *p = r.read_i8()?;
        }
        let proxies = Proxies {
            item_count: read_i16s(r, n_place)?,
            component_count: read_i16s(r, n_place)?,
            completed_item_count: read_i16s(r, n_place)?,
            unit_count: read_i16s(r, n_place)?,
            two_star_count: read_i16s(r, n_place)?,
            three_star_count: read_i16s(r, n_place)?,
            unit_gold_value: {
                let mut v = vec![0i32; n_place];
                for x in v.iter_mut() {
                    *x = r.read_i32::<LE>()?;
                }
                v
            },
        };

        let all_players = read_bitmap(r)?;

        let mut tokens_vec = Vec::with_capacity(n_tokens);
        for _ in 0..n_tokens {
            tokens_vec.push(read_str(r)?);
        }
        let mut labels = Vec::with_capacity(n_tokens);
        for _ in 0..n_tokens {
            labels.push(read_str(r)?);
        }
        let vocab = Vocab::from_parts(tokens_vec, labels);

        let mut tokens = Vec::with_capacity(n_tokens);
        for _ in 0..n_tokens {
            let blen = r.read_u32::<LE>()?;
            let bitmap = if blen > 0 {
                let mut buf = vec![0u8; blen as usize];
                r.read_exact(&mut buf)?;
                RoaringBitmap::deserialize_from(&buf[..])
                    .map_err(|e| Error::SnapshotCorrupt(format!("bitmap: {}", e)))?
            } else {
                RoaringBitmap::new()
            };
            let placement_sum = r.read_i64::<LE>()?;
            let count = r.read_i32::<LE>()?;
            tokens.push(TokenStats {
                bitmap,
                placement_sum,
                count: count.max(0) as u32,
            });
        }

        let necessity = NecessityCache {
            tau: read_f32s(r, n_tokens)?,
            ci95_low: read_f32s(r, n_tokens)?,
            ci95_high: read_f32s(r, n_tokens)?,
            se: read_f32s(r, n_tokens)?,
            raw_tau: read_f32s(r, n_tokens)?,
            frac_trimmed: read_f32s(r, n_tokens)?,
            e_p01: read_f32s(r, n_tokens)?,
            e_p99: read_f32s(r, n_tokens)?,
            n_treated: read_i32s(r, n_tokens)?,
            n_control: read_i32s(r, n_tokens)?,
            n_used: read_i32s(r, n_tokens)?,
            scope_min_star: {
                let mut v = vec![0u8; n_tokens];
                r.read_exact(&mut v)?;
                v
            },
        };

        Ok(Engine {
            vocab,
            tokens,
            placements,
            proxies,
            all_players,
            total_matches,
            necessity,
        })
    }
}

fn write_str<W: Write>(w: &mut W, s: &str) -> Result<(), Error> {
    let bytes = s.as_bytes();
    w.write_u16::<LE>(bytes.len() as u16)?;
    w.write_all(bytes)?;
    Ok(())
}

fn read_str<R: Read>(r: &mut R) -> Result<String, Error> {
    let len = r.read_u16::<LE>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| Error::SnapshotCorrupt(format!("utf8: {}", e)))
}

fn write_bitmap<W: Write>(w: &mut W, bitmap: &RoaringBitmap) -> Result<(), Error> {
    w.write_u32::<LE>(bitmap.serialized_size() as u32)?;
    bitmap.serialize_into(&mut *w)?;
    Ok(())
}

fn read_bitmap<R: Read>(r: &mut R) -> Result<RoaringBitmap, Error> {
    let len = r.read_u32::<LE>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    RoaringBitmap::deserialize_from(&buf[..])
        .map_err(|e| Error::SnapshotCorrupt(format!("bitmap: {}", e)))
}

fn write_i16s<W: Write>(w: &mut W, xs: &[i16]) -> Result<(), Error> {
    for &x in xs {
        w.write_i16::<LE>(x)?;
    }
    Ok(())
}

fn read_i16s<R: Read>(r: &mut R, n: usize) -> Result<Vec<i16>, Error> {
    let mut v = vec![0i16; n];
    for x in v.iter_mut() {
        *x = r.read_i16::<LE>()?;
    }
    Ok(v)
}

fn write_i32s<W: Write>(w: &mut W, xs: &[i32]) -> Result<(), Error> {
    for &x in xs {
        w.write_i32::<LE>(x)?;
    }
    Ok(())
}

fn read_i32s<R: Read>(r: &mut R, n: usize) -> Result<Vec<i32>, Error> {
    let mut v = vec![0i32; n];
    for x in v.iter_mut() {
        *x = r.read_i32::<LE>()?;
    }
    Ok(v)
}

fn write_f32s<W: Write>(w: &mut W, xs: &[f32]) -> Result<(), Error> {
    for &x in xs {
        w.write_f32::<LE>(x)?;
    }
    Ok(())
}

fn read_f32s<R: Read>(r: &mut R, n: usize) -> Result<Vec<f32>, Error> {
    let mut v = vec![0f32; n];
    for x in v.iter_mut() {
        *x = r.read_f32::<LE>()?;
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::builder::Builder;
    use crate::engine::necessity::StoredNecessity;
    use crate::engine::row::PlayerMatchRow;
    use crate::engine::row::TraitRow;
    use crate::engine::row::UnitRow;

    fn sample_engine() -> Engine {
        let mut builder = Builder::new();
        for (placement, unit, items) in [
            (1i8, "Ashe", vec!["InfinityEdge", "InfinityEdge"]),
            (8, "Ashe", vec!["GuinsoosRageblade"]),
            (4, "Briar", vec![]),
            (3, "Briar", vec!["InfinityEdge"]),
        ] {
            builder.witness(&PlayerMatchRow {
                placement,
                units: vec![UnitRow {
                    name: unit.to_string(),
                    tier: 2,
                    rarity: 2,
                    items: items.into_iter().map(String::from).collect(),
                }],
                traits: vec![TraitRow {
                    name: "Demacia".to_string(),
                    tier: 2,
                    num_units: Some(5),
                }],
            });
        }
        let mut engine = builder.seal();
        let id = engine.vocab.id("E:Ashe|InfinityEdge").unwrap();
        engine.necessity.set(
            id,
            StoredNecessity {
                tau: 0.08,
                ci95_low: 0.02,
                ci95_high: 0.14,
                se: 0.03,
                raw_tau: 0.11,
                frac_trimmed: 0.05,
                e_p01: 0.1,
                e_p99: 0.9,
                n_treated: 1000,
                n_control: 3000,
                n_used: 3900,
                scope_min_star: 2,
            },
        );
        engine
    }

    #[test]
    fn round_trip_is_lossless() {
        let engine = sample_engine();
        let path = std::env::temp_dir().join(format!("smeecher-test-{}.bin", std::process::id()));
        engine.save(&path).unwrap();
        let loaded = Engine::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.total_matches, engine.total_matches);
        assert_eq!(loaded.placements, engine.placements);
        assert_eq!(loaded.proxies, engine.proxies);
        assert_eq!(loaded.all_players, engine.all_players);
        assert_eq!(loaded.tokens, engine.tokens);
        assert_eq!(loaded.necessity, engine.necessity);
        assert_eq!(loaded.vocab.len(), engine.vocab.len());
        for id in 0..engine.vocab.len() {
            assert_eq!(loaded.vocab.token(id), engine.vocab.token(id));
            assert_eq!(loaded.vocab.label(id), engine.vocab.label(id));
        }
    }

    #[test]
    fn version_mismatch_is_fatal() {
        let engine = sample_engine();
        let path = std::env::temp_dir().join(format!("smeecher-ver-{}.bin", std::process::id()));
        engine.save(&path).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[4] = 99;
        std::fs::write(&path, &bytes).unwrap();
        let err = Engine::load(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(
            err,
            Error::SnapshotVersionMismatch { found: 99, expected: 3 }
        ));
        assert!(err.is_fatal());
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let path = std::env::temp_dir().join(format!("smeecher-magic-{}.bin", std::process::id()));
        std::fs::write(&path, b"NOPE\x03\x00\x00\x00").unwrap();
        let err = Engine::load(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, Error::SnapshotCorrupt(_)));
    }
}
