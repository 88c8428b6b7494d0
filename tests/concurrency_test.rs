use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use pki_tree::certificate_factory::CertificateFactory;
use pki_tree::certificate_info::{CertificateInfo, CertificateRecord};
use pki_tree::file_storage::FileStorage;
use pki_tree::manager::Manager;
use pki_tree::storage::{ParentFilter, Storage};
use tempfile::TempDir;

const THREADS: u64 = 8;
const PER_THREAD: u64 = 10;

#[test]
fn test_concurrent_stores_assign_unique_ids() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("certs.json");
    let storage = Arc::new(FileStorage::open(&path).unwrap());

    let mut root = CertificateRecord::pending(CertificateInfo::new("root", 30), 0);
    root.certificate_bytes = b"root-cert".to_vec();
    root.private_key_bytes = b"root-key".to_vec();
    let root_id = storage.store(&mut root).unwrap();

    let handles: Vec<_> = (0..THREADS)
        .map(|worker| {
            let storage = Arc::clone(&storage);
            thread::spawn(move || {
                (0..PER_THREAD)
                    .map(|n| {
                        let name = format!("worker {} cert {}", worker, n);
                        let mut record =
                            CertificateRecord::pending(CertificateInfo::new(name, 30), root_id);
                        record.certificate_bytes = b"cert".to_vec();
                        record.private_key_bytes = b"key".to_vec();
                        storage.store(&mut record).unwrap()
                    })
                    .collect::<Vec<u64>>()
            })
        })
        .collect();

    let mut assigned = HashSet::new();
    for handle in handles {
        let ids = handle.join().unwrap();
        // Each thread sees its own ids strictly increasing.
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
        for id in ids {
            assert!(assigned.insert(id), "id {} assigned twice", id);
        }
    }

    let total = THREADS * PER_THREAD;
    assert_eq!(assigned.len() as u64, total);
    assert_eq!(storage.max_id(), total + 1);
    assert_eq!(storage.children(root_id).unwrap().len() as u64, total);

    drop(storage);
    let reopened = FileStorage::open(&path).unwrap();
    assert_eq!(reopened.len() as u64, total + 1);
    assert_eq!(
        reopened.search("", ParentFilter::ChildrenOf(root_id)).unwrap().len() as u64,
        total
    );
}

#[test]
fn test_concurrent_issuance_through_manager() {
    let dir = TempDir::new().unwrap();
    let storage = FileStorage::open(dir.path().join("certs.json")).unwrap();
    let manager = Arc::new(Manager::new(storage, CertificateFactory::default()));
    let root_id = manager.add_root_ca(CertificateInfo::new("Root", 365)).unwrap().id;

    let handles: Vec<_> = (0..4)
        .map(|n| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                let info = CertificateInfo::new(format!("server {}", n), 30);
                let record = manager.add_server_certificate(info, root_id).unwrap();
                // Readers run alongside writers.
                manager.search("", ParentFilter::All).unwrap();
                record.id
            })
        })
        .collect();

    let ids: HashSet<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(ids.len(), 4);
    for id in ids {
        assert!(manager.verify(id).unwrap());
    }
}
