mod support;

use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::sync::mpsc;
use std::time::Duration;

use support::memory::MemoryLoader;
use support::sample_bytes;

fn read_all(stream: &mut impl Read) -> Vec<u8> {
    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    out
}

#[test]
fn content_of_exactly_one_chunk() {
    let data = sample_bytes(1000, 1);
    let (loader, mut stream) = MemoryLoader::new(data.clone(), 1000).open(3);
    assert_eq!(stream.size(), 1000);
    assert_eq!(read_all(&mut stream), data);
    assert_eq!(loader.requested(), vec![0]);
}

#[test]
fn one_byte_past_a_chunk_boundary() {
    let data = sample_bytes(1001, 2);
    let (loader, mut stream) = MemoryLoader::new(data.clone(), 1000).open(3);
    assert_eq!(read_all(&mut stream), data);
    assert_eq!(loader.requested(), vec![0, 1]);
}

#[test]
fn single_byte_content() {
    let (_, mut stream) = MemoryLoader::new(vec![0xab], 1000).open(3);
    assert_eq!(read_all(&mut stream), vec![0xab]);
    let mut buf = [0u8; 8];
    assert_eq!(stream.read(&mut buf).unwrap(), 0);
}

#[test]
fn reading_last_byte_only_fetches_its_chunk() {
    let data = sample_bytes(3500, 3);
    let (loader, mut stream) = MemoryLoader::new(data.clone(), 1000).open(0);

    stream.seek(SeekFrom::Start(3499)).unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(stream.read(&mut buf).unwrap(), 1);
    assert_eq!(buf[0], data[3499]);
    assert_eq!(loader.requested(), vec![0, 3]);

    assert_eq!(stream.read(&mut buf).unwrap(), 0);
    stream.seek(SeekFrom::Start(3500)).unwrap();
    assert_eq!(stream.read(&mut buf).unwrap(), 0);
}

#[test]
fn chunks_are_requested_once_with_preload() {
    let data = sample_bytes(5000, 4);
    let (loader, mut stream) = MemoryLoader::new(data.clone(), 1000).open(2);

    let mut buf = [0u8; 10];
    stream.read(&mut buf).unwrap();
    assert_eq!(loader.requested(), vec![0, 1, 2]);

    stream.seek(SeekFrom::Start(0)).unwrap();
    assert_eq!(read_all(&mut stream), data);
    assert_eq!(loader.requested(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn seek_clamps_and_rejects_negative_positions() {
    let (_, mut stream) = MemoryLoader::new(sample_bytes(2000, 5), 1000).open(1);
    assert_eq!(stream.seek(SeekFrom::Start(9999)).unwrap(), 2000);
    assert_eq!(stream.seek(SeekFrom::End(-10)).unwrap(), 1990);
    assert_eq!(stream.seek(SeekFrom::Current(5)).unwrap(), 1995);
    let err = stream.seek(SeekFrom::Current(-5000)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(stream.position(), 1995);
}

#[test]
fn mark_reset_and_skip() {
    let data = sample_bytes(3000, 6);
    let (loader, mut stream) = MemoryLoader::new(data.clone(), 1000).open(0);

    let mut first = [0u8; 5];
    stream.seek(SeekFrom::Start(10)).unwrap();
    stream.mark();
    stream.read_exact(&mut first).unwrap();
    stream.reset().unwrap();
    let mut again = [0u8; 5];
    stream.read_exact(&mut again).unwrap();
    assert_eq!(first, again);
    assert_eq!(&first, &data[10..15]);

    assert_eq!(stream.skip(2485).unwrap(), 2485);
    assert_eq!(stream.position(), 2500);
    assert!(loader.requested().contains(&2));
    let mut byte = [0u8; 1];
    stream.read_exact(&mut byte).unwrap();
    assert_eq!(byte[0], data[2500]);

    assert_eq!(stream.skip(10_000).unwrap(), 499);
    assert_eq!(stream.position(), 3000);
}

#[test]
fn reset_without_mark_is_rejected() {
    let (_, mut stream) = MemoryLoader::new(sample_bytes(8, 0), 4).open(0);
    assert_eq!(stream.reset().unwrap_err().kind(), ErrorKind::InvalidInput);
}

#[test]
fn failed_chunk_errors_then_recovers_on_next_read() {
    let data = sample_bytes(3000, 7);
    let (loader, mut stream) = MemoryLoader::new(data.clone(), 1000).fail_once(1).open(0);

    stream.seek(SeekFrom::Start(1000)).unwrap();
    let mut buf = [0u8; 4];
    let err = stream.read(&mut buf).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Other);

    stream.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, &data[1000..1004]);
    assert_eq!(loader.requested(), vec![0, 1, 1]);
}

#[test]
fn short_chunk_is_an_error() {
    let (_, mut stream) = MemoryLoader::new(sample_bytes(3000, 8), 1000).short(1).open(0);
    stream.seek(SeekFrom::Start(1500)).unwrap();
    let mut buf = [0u8; 4];
    let err = stream.read(&mut buf).unwrap_err();
    assert!(err.to_string().contains("short"), "{err}");
}

#[test]
fn close_wakes_a_blocked_reader() {
    let (_, mut stream) = MemoryLoader::new(sample_bytes(3000, 9), 1000).hold(1).open(0);
    stream.seek(SeekFrom::Start(1000)).unwrap();
    let closer = stream.closer();

    let (tx, rx) = mpsc::channel();
    let reader = std::thread::spawn(move || {
        let mut buf = [0u8; 4];
        tx.send(stream.read(&mut buf)).unwrap();
    });

    std::thread::sleep(Duration::from_millis(50));
    assert!(rx.try_recv().is_err(), "read returned before the chunk arrived");
    closer.close();

    let result = rx.recv_timeout(Duration::from_secs(2)).expect("reader still blocked");
    assert_eq!(result.unwrap_err().kind(), ErrorKind::BrokenPipe);
    reader.join().unwrap();
}

#[test]
fn closed_stream_refuses_reads() {
    let (loader, mut stream) = MemoryLoader::new(sample_bytes(3000, 10), 1000).open(0);
    stream.close();
    let mut buf = [0u8; 4];
    assert_eq!(stream.read(&mut buf).unwrap_err().kind(), ErrorKind::BrokenPipe);
    assert_eq!(loader.requested(), vec![0]);
}
