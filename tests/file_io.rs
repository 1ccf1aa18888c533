//! End-to-end file channel scenarios.

mod common;

use riptide::buffer::{buffer_write, Buffer, DynamicBuffer, FixedBuffer};
use riptide::channel::{
    DirectFileChannel, FileFlags, InputFileChannel, OutputFileChannel,
};
use riptide::task::wait;
use riptide::ErrorKind;

fn fixture(contents: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("fixture.bin");
    std::fs::write(&path, contents).expect("write fixture");
    (dir, path)
}

#[test]
fn async_read_at_returns_the_requested_window() {
    common::init_logging();
    let (_dir, path) = fixture(b"0123456789");

    wait(async {
        let mut file = DirectFileChannel::new();
        file.async_open(&path, FileFlags::READ).await.unwrap();

        let mut buf = FixedBuffer::<5>::new();
        let n = file.async_read_some_at(3, &mut buf).await.unwrap();
        assert_eq!(n, 5);

        let mut out = [0u8; 5];
        buf.read(&mut out);
        assert_eq!(&out, b"34567");

        file.async_close().await.unwrap();
    });
}

#[test]
fn sequential_open_with_write_flag_is_invalid_and_creates_nothing() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("never-created.txt");

    let mut channel = InputFileChannel::new();
    let err = wait(channel.async_open(&path, FileFlags::WRITE)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidFileFlags);
    assert!(!path.exists());
}

#[test]
fn write_then_read_back_preserves_bytes_in_order() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roundtrip.bin");
    let payload = b"the quick brown fox jumps over the lazy dog";

    wait(async {
        let mut writer = OutputFileChannel::new();
        writer
            .async_open(&path, FileFlags::CREATE_NEW | FileFlags::OPEN_EXISTING)
            .await
            .unwrap();

        let mut buf = DynamicBuffer::with_extent_size(8);
        buf.write(payload);
        while buf.readable_len() > 0 {
            writer.async_write_some(&mut buf).await.unwrap();
        }
        writer.async_close().await.unwrap();

        let mut reader = InputFileChannel::new();
        reader.async_open(&path, FileFlags::NONE).await.unwrap();

        let mut collected = Vec::new();
        let mut chunk = FixedBuffer::<16>::new();
        loop {
            chunk.reset();
            match reader.async_read_some(&mut chunk).await {
                Ok(n) => {
                    let mut piece = vec![0u8; n];
                    chunk.read(&mut piece);
                    collected.extend_from_slice(&piece);
                }
                Err(err) => {
                    assert_eq!(err.kind(), ErrorKind::EndOfFile);
                    break;
                }
            }
        }
        assert_eq!(collected, payload);
        reader.async_close().await.unwrap();
    });
}

#[test]
fn reading_past_the_end_is_end_of_file_not_zero() {
    common::init_logging();
    let (_dir, path) = fixture(b"tiny");

    wait(async {
        let mut file = DirectFileChannel::new();
        file.async_open(&path, FileFlags::READ).await.unwrap();

        let mut buf = FixedBuffer::<8>::new();
        let err = file.async_read_some_at(100, &mut buf).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EndOfFile);

        file.async_close().await.unwrap();
    });
}

#[test]
fn open_close_open_again() {
    common::init_logging();
    let (_dir, path) = fixture(b"abc");

    wait(async {
        let mut file = InputFileChannel::new();
        file.async_open(&path, FileFlags::NONE).await.unwrap();
        file.async_close().await.unwrap();
        file.async_open(&path, FileFlags::NONE).await.unwrap();

        let err = file.async_open(&path, FileFlags::NONE).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChannelAlreadyOpen);

        file.async_close().await.unwrap();
    });
}

#[test]
fn nul_byte_in_path_fails_before_the_syscall() {
    common::init_logging();
    let mut channel = InputFileChannel::new();
    let err = wait(channel.async_open("has\0nul", FileFlags::NONE)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn create_new_refuses_an_existing_file() {
    common::init_logging();
    let (_dir, path) = fixture(b"existing");

    let mut writer = OutputFileChannel::new();
    let err = wait(writer.async_open(&path, FileFlags::CREATE_NEW)).unwrap_err();
    // Mapped from the OS "already exists" error.
    assert_ne!(err.kind(), ErrorKind::InvalidFileFlags);
    assert!(!writer.is_open());
}

#[test]
fn append_mode_writes_at_end_of_file() {
    common::init_logging();
    let (_dir, path) = fixture(b"prefix-");

    wait(async {
        let mut writer = OutputFileChannel::new();
        writer
            .async_open(&path, FileFlags::APPEND | FileFlags::OPEN_EXISTING)
            .await
            .unwrap();

        let mut buf = FixedBuffer::<8>::new();
        buffer_write(&mut buf, b"suffix");
        writer.async_write_some(&mut buf).await.unwrap();
        writer.async_close().await.unwrap();
    });

    assert_eq!(std::fs::read(&path).unwrap(), b"prefix-suffix");
}
