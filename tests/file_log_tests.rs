mod common;

use common::{conflict, MockServer, MockUpdate};
use txsolid::tx::{TmSetting, TxFileLogConfig, TxFileLogDirectoryType, TxFileLogger};
use txsolid::types::{CommitType, TxOption};

use std::fs;
use std::sync::Arc;

#[test]
fn test_file_per_transaction() {
  let temp_dir = tempfile::tempdir().unwrap();
  let server = MockServer::new();
  let session = server.session();
  let logger = Arc::new(TxFileLogger::new(TxFileLogConfig::new(temp_dir.path())));
  session.add_transaction_listener(logger.clone());
  let update = MockUpdate::new(&server, "update t set v = 1", 4);

  let tx = session.create_transaction(TxOption::occ().label("file-log")).unwrap();
  tx.execute_and_get_count(&update).unwrap();
  tx.commit(CommitType::Default).unwrap();
  assert_eq!(logger.open_files(), 1);
  tx.close().unwrap();
  assert_eq!(logger.open_files(), 0);

  let path = temp_dir.path().join(format!("tx{}.log", tx.tx_id()));
  let content = fs::read_to_string(path).unwrap();
  let lines: Vec<&str> = content.lines().collect();
  assert!(lines[0].contains("created"));
  assert!(content.contains("label=file-log"));
  assert!(content.contains("execute_and_get_count start. sql=update t set v = 1"));
  assert!(content.contains("execute_and_get_count end. count=4"));
  assert!(content.contains("commit start"));
  assert!(content.contains("commit end"));
  assert!(lines.last().unwrap().contains("transaction close end"));
}

#[test]
fn test_manager_layout_groups_attempts() {
  let temp_dir = tempfile::tempdir().unwrap();
  let server = MockServer::new();
  server.script_commit(conflict());
  let session = server.session();
  let config = TxFileLogConfig::new(temp_dir.path())
    .directory_type(TxFileLogDirectoryType::TmTx)
    .auto_flush(true);
  session.add_transaction_listener(Arc::new(TxFileLogger::new(config)));
  let tm = session.create_transaction_manager_with(TmSetting::of_always(TxOption::occ(), 2));
  let update = MockUpdate::new(&server, "update", 1);

  let mut tm_execute_id = 0;
  tm.execute(|tx| {
    tm_execute_id = tx.tm_execute_id();
    tx.execute_and_get_count(&update)
  })
  .unwrap();

  let dir = temp_dir.path().join(format!("tm{}", tm_execute_id));
  let mut files: Vec<String> = fs::read_dir(&dir)
    .unwrap()
    .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
    .collect();
  files.sort();
  assert_eq!(files.len(), 2);

  let contents: Vec<String> = files
    .iter()
    .map(|name| fs::read_to_string(dir.join(name)).unwrap())
    .collect();
  assert_eq!(contents.iter().filter(|c| c.contains("commit failed")).count(), 1);
  assert_eq!(contents.iter().filter(|c| c.contains("rollback end")).count(), 1);
  assert!(contents.iter().all(|c| c.contains("transaction close end")));
}
