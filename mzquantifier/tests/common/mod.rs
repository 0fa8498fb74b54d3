#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::Connection;

const SCHEMA: &str = "CREATE TABLE rawfile (ID INTEGER PRIMARY KEY, name TEXT);
    CREATE TABLE scans (rawfile INTEGER, rt INTEGER, polarity TEXT, scan_type TEXT, scan_ID INTEGER, precursor INTEGER);
    CREATE TABLE ms1_peaks (rawfile INTEGER, rt INTEGER, intensity REAL, mz INTEGER);
    CREATE TABLE ms2_peaks (precursor INTEGER, mz INTEGER, rt INTEGER, rawfile INTEGER, intensity REAL);
    CREATE TABLE sequence (attribute TEXT, value REAL);
    INSERT INTO sequence VALUES ('mass_translation_factor', 10000), ('time_translation_factor', 1000);";

/// Two samples, A and B, each with positive MS1 scans at 5.0, 5.1 and 5.2 minutes and a
/// peak at m/z 200 in every scan. Sample A also carries one fragment with a loss of 132.042.
pub fn build_study(dir: &Path) -> rusqlite::Result<PathBuf> {
    let path = dir.join("study.sqlite3");
    let conn = Connection::open(&path)?;
    conn.execute_batch(SCHEMA)?;
    conn.execute_batch(
        "INSERT INTO rawfile VALUES (0, 'blank'), (1, 'A'), (2, 'B');
         INSERT INTO scans VALUES (1, 300000, '+', 'MS1', 1, 0), (1, 306000, '+', 'MS1', 2, 0),
                                  (1, 312000, '+', 'MS1', 3, 0),
                                  (2, 300000, '+', 'MS1', 1, 0), (2, 306000, '+', 'MS1', 2, 0),
                                  (2, 312000, '+', 'MS1', 3, 0);
         INSERT INTO ms1_peaks VALUES (1, 300000, 1000000.0, 2000000), (1, 306000, 3000000.0, 2000000),
                                      (1, 312000, 200000.0, 2000000),
                                      (2, 300000, 2000000.0, 2000000), (2, 306000, 5000000.0, 2000000),
                                      (2, 312000, 1000000.0, 2000000);
         INSERT INTO ms2_peaks VALUES (3000000, 1679580, 300000, 1, 2000.0),
                                      (3000000, 2000000, 300000, 1, 9000.0);",
    )?;
    Ok(path)
}

/// A study whose `rawfile` table names a sample that has no scans
pub fn build_inconsistent_study(dir: &Path) -> rusqlite::Result<PathBuf> {
    let path = dir.join("inconsistent.sqlite3");
    let conn = Connection::open(&path)?;
    conn.execute_batch(SCHEMA)?;
    conn.execute_batch(
        "INSERT INTO rawfile VALUES (1, 'A'), (2, 'B'), (3, 'C');
         INSERT INTO scans VALUES (1, 300000, '+', 'MS1', 1, 0), (2, 300000, '+', 'MS1', 1, 0);",
    )?;
    Ok(path)
}

pub fn write_table(dir: &Path, name: &str, content: &str) -> std::io::Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, content)?;
    Ok(path)
}
