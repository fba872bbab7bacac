//! Shared fixture plumbing for the pipeline integration tests.
//!
//! Fixture containers are real files in a temp directory: SQLite
//! databases created through sqlx with the same tables the device
//! software writes, plists via the plist crate, and blobs named by the
//! backup's own hash scheme.
#![allow(dead_code)]

use galena_triage::container::ios::file_id_for;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{Executor, SqlitePool};
use std::path::{Path, PathBuf};

/// Create a SQLite database at `path` and run each statement in order.
/// Rollback journal mode keeps the fixture a single file, like a real
/// backup blob.
pub async fn create_db(path: &Path, statements: &[&str]) {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete);
    let pool = SqlitePool::connect_with(options).await.expect("create fixture db");
    for statement in statements {
        pool.execute(*statement).await.expect("fixture statement");
    }
    pool.close().await;
}

/// Builder for an iOS hashed-blob backup fixture (flat blob layout).
pub struct IosFixture {
    pub root: PathBuf,
}

impl IosFixture {
    pub fn new(root: &Path) -> Self {
        let mut manifest = plist::Dictionary::new();
        manifest.insert("IsEncrypted".to_string(), plist::Value::Boolean(false));
        plist::Value::Dictionary(manifest)
            .to_file_xml(root.join("Manifest.plist"))
            .expect("write Manifest.plist");

        let mut info = plist::Dictionary::new();
        info.insert(
            "Device Name".to_string(),
            plist::Value::String("Evidence iPhone".to_string()),
        );
        info.insert(
            "Product Type".to_string(),
            plist::Value::String("iPhone14,5".to_string()),
        );
        info.insert(
            "Product Version".to_string(),
            plist::Value::String("16.6".to_string()),
        );
        info.insert(
            "Serial Number".to_string(),
            plist::Value::String("F2LXK0XXXX".to_string()),
        );
        info.insert(
            "Installed Applications".to_string(),
            plist::Value::Array(vec![
                plist::Value::String("com.apple.mobilesafari".to_string()),
                plist::Value::String("com.example.chat".to_string()),
            ]),
        );
        plist::Value::Dictionary(info)
            .to_file_xml(root.join("Info.plist"))
            .expect("write Info.plist");

        Self {
            root: root.to_path_buf(),
        }
    }

    /// Path a blob for this logical address must live at (flat layout).
    pub fn blob_path(&self, logical_path: &str) -> PathBuf {
        self.root.join(file_id_for(logical_path))
    }

    /// Create the artifact database for `logical_path` from statements.
    pub async fn add_db(&self, logical_path: &str, statements: &[&str]) {
        create_db(&self.blob_path(logical_path), statements).await;
    }

    /// Drop raw bytes in as a media blob.
    pub fn add_blob(&self, logical_path: &str, bytes: &[u8]) {
        std::fs::write(self.blob_path(logical_path), bytes).expect("write blob");
    }
}

/// Standard sms.db fixture: Alex (+15551230000) exchanging messages,
/// one attachment, one malformed-date row.
pub const SMS_DB: &[&str] = &[
    "CREATE TABLE handle (ROWID INTEGER PRIMARY KEY, id TEXT, service TEXT)",
    "CREATE TABLE chat (ROWID INTEGER PRIMARY KEY, display_name TEXT, chat_identifier TEXT)",
    "CREATE TABLE message (ROWID INTEGER PRIMARY KEY, date INTEGER, handle_id INTEGER,
        is_from_me INTEGER, is_delivered INTEGER, is_read INTEGER, text TEXT)",
    "CREATE TABLE chat_message_join (chat_id INTEGER, message_id INTEGER)",
    "CREATE TABLE chat_handle_join (chat_id INTEGER, handle_id INTEGER)",
    "CREATE TABLE attachment (ROWID INTEGER PRIMARY KEY, filename TEXT, mime_type TEXT, transfer_name TEXT)",
    "CREATE TABLE message_attachment_join (message_id INTEGER, attachment_id INTEGER)",
    "INSERT INTO handle VALUES (1, '+15551230000', 'SMS')",
    "INSERT INTO chat VALUES (1, NULL, '+15551230000')",
    "INSERT INTO chat_handle_join VALUES (1, 1)",
    // 2023-05-06T12:00:00Z in cocoa nanoseconds
    "INSERT INTO message VALUES (1, 700315200000000000, 1, 0, 1, 1, 'meet at the spot')",
    "INSERT INTO message VALUES (2, 700315260000000000, 1, 1, 1, 1, 'on my way')",
    // Pre-epoch date: must surface flagged, not vanish
    "INSERT INTO message VALUES (3, -9000000000000000000, 1, 0, 0, 0, 'ghost message')",
    "INSERT INTO chat_message_join VALUES (1, 1)",
    "INSERT INTO chat_message_join VALUES (1, 2)",
    "INSERT INTO chat_message_join VALUES (1, 3)",
    "INSERT INTO attachment VALUES (1, '~/Library/SMS/Attachments/ab/IMG_0001.JPG', 'image/jpeg', 'IMG_0001.JPG')",
    "INSERT INTO message_attachment_join VALUES (1, 1)",
];

/// Address book with Alex under a formatted number variant.
pub const ADDRESS_BOOK_DB: &[&str] = &[
    "CREATE TABLE ABPerson (ROWID INTEGER PRIMARY KEY, First TEXT, Last TEXT, CreationDate INTEGER)",
    "CREATE TABLE ABMultiValueLabel (value TEXT)",
    "CREATE TABLE ABMultiValue (record_id INTEGER, property INTEGER, label INTEGER, value TEXT)",
    "INSERT INTO ABMultiValueLabel VALUES ('_$!<Mobile>!$_')",
    "INSERT INTO ABPerson VALUES (1, 'Alex', NULL, 689000000)",
    "INSERT INTO ABMultiValue VALUES (1, 3, 1, '+1 (555) 123-0000')",
    "INSERT INTO ABMultiValue VALUES (1, 4, NULL, 'alex@example.com')",
];

pub const CALL_HISTORY_DB: &[&str] = &[
    "CREATE TABLE ZCALLRECORD (Z_PK INTEGER PRIMARY KEY, ZDATE REAL, ZDURATION REAL,
        ZADDRESS TEXT, ZORIGINATED INTEGER, ZANSWERED INTEGER, ZCALLTYPE INTEGER)",
    // 2023-05-06T13:00:00Z in cocoa seconds
    "INSERT INTO ZCALLRECORD VALUES (1, 700318800.0, 125.0, '+15551230000', 0, 1, 1)",
    "INSERT INTO ZCALLRECORD VALUES (2, 700319000.0, 0.0, '+15559990000', 1, 0, 8)",
    // 1969: implausible, flagged not rejected
    "INSERT INTO ZCALLRECORD VALUES (3, -1000000000.0, 10.0, '+15551230000', 0, 1, 1)",
];

pub const TCC_DB: &[&str] = &[
    "CREATE TABLE access (service TEXT, client TEXT, auth_value INTEGER)",
    "INSERT INTO access VALUES ('kTCCServiceCamera', 'com.example.chat', 2)",
    "INSERT INTO access VALUES ('kTCCServiceMicrophone', 'com.example.chat', 0)",
];

pub const SAFARI_HISTORY_DB: &[&str] = &[
    "CREATE TABLE history_items (id INTEGER PRIMARY KEY, url TEXT, visit_count INTEGER)",
    "CREATE TABLE history_visits (id INTEGER PRIMARY KEY, history_item INTEGER,
        visit_time REAL, title TEXT, load_successful INTEGER)",
    "INSERT INTO history_items VALUES (1, 'https://example.com/map', 4)",
    "INSERT INTO history_visits VALUES (1, 1, 700320000.0, 'The Map', 1)",
];

pub const ACCOUNTS_DB: &[&str] = &[
    "CREATE TABLE ZACCOUNT (Z_PK INTEGER PRIMARY KEY, ZDATE REAL, ZUSERNAME TEXT, ZACCOUNTDESCRIPTION TEXT)",
    "INSERT INTO ZACCOUNT VALUES (1, 690000000.0, 'alex@example.com', 'iCloud')",
];

pub const PHOTOS_DB: &[&str] = &[
    "CREATE TABLE ZASSET (Z_PK INTEGER PRIMARY KEY, ZDIRECTORY TEXT, ZFILENAME TEXT,
        ZDATECREATED REAL, ZADDEDDATE REAL, ZLATITUDE REAL, ZLONGITUDE REAL)",
    "CREATE TABLE ZADDITIONALASSETATTRIBUTES (Z_PK INTEGER PRIMARY KEY, ZASSET INTEGER)",
    "CREATE TABLE ZSCENECLASSIFICATION (Z_PK INTEGER PRIMARY KEY, ZASSETATTRIBUTES INTEGER,
        ZSCENEIDENTIFIER INTEGER, ZCONFIDENCE REAL)",
    "INSERT INTO ZASSET VALUES (1, 'DCIM/100APPLE', 'IMG_0001.JPG', 700316000.0, 700316100.0, 37.33, -122.03)",
    "INSERT INTO ZADDITIONALASSETATTRIBUTES VALUES (1, 1)",
    // Device-computed scene rows: vehicle + document
    "INSERT INTO ZSCENECLASSIFICATION VALUES (1, 1, 1447, 0.91)",
    "INSERT INTO ZSCENECLASSIFICATION VALUES (2, 1, 492, 0.40)",
    // Second asset: corrupted media blob
    "INSERT INTO ZASSET VALUES (2, 'DCIM/100APPLE', 'IMG_0002.JPG', 700317000.0, 700317100.0, -180.0, -180.0)",
    "INSERT INTO ZADDITIONALASSETATTRIBUTES VALUES (2, 2)",
];

/// Logical addresses matching the well-known iOS sources.
pub mod addr {
    pub const SMS: &str = "HomeDomain-Library/SMS/sms.db";
    pub const ADDRESS_BOOK: &str = "HomeDomain-Library/AddressBook/AddressBook.sqlitedb";
    pub const CALL_HISTORY: &str = "HomeDomain-Library/CallHistoryDB/CallHistory.storedata";
    pub const TCC: &str = "HomeDomain-Library/TCC/TCC.db";
    pub const SAFARI: &str = "AppDomain-com.apple.mobilesafari-Library/Safari/History.db";
    pub const PHOTOS: &str = "CameraRollDomain-Media/PhotoData/Photos.sqlite";
    pub const ACCOUNTS: &str = "HomeDomain-Library/Accounts/Accounts3.sqlite";
    pub const MEDIA_1: &str = "CameraRollDomain-Media/DCIM/100APPLE/IMG_0001.JPG";
    pub const MEDIA_2: &str = "CameraRollDomain-Media/DCIM/100APPLE/IMG_0002.JPG";
}
