//! Chart archive validation and unpacking
//!
//! Fetched bundle bytes go through two sequential, independently-reportable
//! checks: gzip decompression, then a tar scan that enforces the chart
//! package layout (exactly one top-level directory containing `Chart.yaml`).

use std::collections::BTreeMap;
use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder, Header};

use crate::chart::ChartTree;
use crate::error::{CoreError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Validate and unpack raw bundle bytes into an in-memory chart tree.
///
/// Fails with `CoreError::Decompress` when the bytes are not valid gzip and
/// with `CoreError::ChartLint` when the decompressed stream is not a
/// well-formed chart package.
pub fn unpack_chart(data: &[u8]) -> Result<ChartTree> {
    let raw = decompress(data)?;
    let files = scan_tar(&raw)?;
    ChartTree::from_files(files)
}

fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    // The codec reports header problems lazily; checking the magic up front
    // keeps the "invalid header" message exact for non-gzip payloads.
    if data.len() < 2 || data[..2] != GZIP_MAGIC {
        return Err(CoreError::Decompress {
            message: "invalid header".to_string(),
        });
    }

    let mut decoder = GzDecoder::new(data);
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| CoreError::Decompress {
            message: e.to_string(),
        })?;

    Ok(raw)
}

/// Read the tar stream and return chart-root-relative files.
///
/// The chart root is the single top-level directory of the archive; any other
/// layout (no directory, several directories, unreadable stream) is a lint
/// failure.
fn scan_tar(raw: &[u8]) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut archive = Archive::new(raw);

    let mut files: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let entries = archive.entries().map_err(|_| CoreError::missing_chart_yaml())?;
    for entry in entries {
        let mut entry = entry.map_err(|_| CoreError::missing_chart_yaml())?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry
            .path()
            .map_err(|_| CoreError::missing_chart_yaml())?
            .to_string_lossy()
            .trim_start_matches("./")
            .to_string();

        let mut content = Vec::new();
        entry
            .read_to_end(&mut content)
            .map_err(|_| CoreError::missing_chart_yaml())?;
        files.insert(path, content);
    }

    let roots: std::collections::BTreeSet<&str> = files
        .keys()
        .filter_map(|path| path.split('/').next())
        .collect();
    if roots.len() != 1 || files.keys().any(|path| !path.contains('/')) {
        return Err(CoreError::missing_chart_yaml());
    }

    Ok(files
        .into_iter()
        .filter_map(|(path, content)| {
            path.split_once('/')
                .map(|(_, rest)| (rest.to_string(), content))
        })
        .collect())
}

/// Build a chart archive (tar.gz) from chart-root-relative files.
///
/// The inverse of [`unpack_chart`]: files are placed under a single top-level
/// directory named after the chart. Entries use mode 0644 and epoch mtime so
/// identical inputs produce identical archives.
pub fn write_chart_archive(chart_name: &str, files: &BTreeMap<String, Vec<u8>>) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);

    for (path, content) in files {
        let mut header = Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();

        builder.append_data(
            &mut header,
            format!("{}/{}", chart_name, path),
            content.as_slice(),
        )?;
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_files() -> BTreeMap<String, Vec<u8>> {
        let mut files = BTreeMap::new();
        files.insert(
            "Chart.yaml".to_string(),
            b"apiVersion: v2\nname: hello-world\nversion: 0.1.0\n".to_vec(),
        );
        files.insert("values.yaml".to_string(), b"replicaCount: 1\n".to_vec());
        files.insert(
            "templates/configmap.yaml".to_string(),
            b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: demo\n".to_vec(),
        );
        files
    }

    #[test]
    fn test_round_trip() {
        let archive = write_chart_archive("hello-world", &sample_files()).unwrap();
        let tree = unpack_chart(&archive).unwrap();

        assert_eq!(tree.metadata.name, "hello-world");
        assert!(tree.file("templates/configmap.yaml").is_some());
        assert_eq!(tree.template_files().count(), 1);
    }

    #[test]
    fn test_non_gzip_bytes() {
        let err = unpack_chart(b"-----BEGIN LICENSE-----").unwrap_err();
        assert!(
            err.to_string().contains("invalid header"),
            "unexpected error: {}",
            err
        );
    }

    #[test]
    fn test_empty_input() {
        let err = unpack_chart(&[]).unwrap_err();
        assert!(err.to_string().contains("invalid header"));
    }

    #[test]
    fn test_truncated_gzip_stream() {
        let mut archive = write_chart_archive("hello-world", &sample_files()).unwrap();
        archive.truncate(archive.len() / 2);

        let err = unpack_chart(&archive).unwrap_err();
        assert!(matches!(err, CoreError::Decompress { .. }));
    }

    #[test]
    fn test_archive_without_chart_yaml() {
        let mut files = sample_files();
        files.remove("Chart.yaml");

        let archive = write_chart_archive("hello-world", &files).unwrap();
        let err = unpack_chart(&archive).unwrap_err();
        assert!(
            err.to_string()
                .contains("unable to check Chart.yaml file in chart"),
            "unexpected error: {}",
            err
        );
    }

    #[test]
    fn test_chart_yaml_below_top_level() {
        // Source-archive layout: Chart.yaml nested one level too deep.
        let mut files = BTreeMap::new();
        files.insert("LICENSE".to_string(), b"license text".to_vec());
        files.insert(
            "charts/hello-world/Chart.yaml".to_string(),
            b"name: hello-world\nversion: 0.1.0\n".to_vec(),
        );

        let archive = write_chart_archive("examples-main", &files).unwrap();
        let err = unpack_chart(&archive).unwrap_err();
        assert!(err
            .to_string()
            .contains("unable to check Chart.yaml file in chart"));
    }

    #[test]
    fn test_deterministic_archives() {
        let a = write_chart_archive("hello-world", &sample_files()).unwrap();
        let b = write_chart_archive("hello-world", &sample_files()).unwrap();
        assert_eq!(a, b);
    }
}
