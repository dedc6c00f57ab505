use normalization_worker::domain::{
    entities::output_page::NamingScheme, services::batch_pipeline::BatchTarget,
};

use crate::helpers::{
    fake_package_id, fake_pdf, leftover_entries, write_archive, TestWorker, TEST_BUCKET,
};

const PREFIX: &str = "acme/docs/normalized/";

fn target<'a>(package_id: &'a str) -> BatchTarget<'a> {
    BatchTarget {
        bucket: TEST_BUCKET,
        output_prefix: PREFIX,
        package_id,
    }
}

#[tokio::test]
async fn archive_without_convertible_files_uploads_nothing_and_cleans_up() {
    // Arrange
    let worker = TestWorker::new();
    let package_id = fake_package_id();
    let archive_path = write_archive(
        worker.scratch_dir.path(),
        &[("notes.txt", b"notes"), ("sheet.xlsx", b"cells")],
    );

    // Act
    let report = worker
        .pipeline(NamingScheme::PackagePages)
        .process_batch(&archive_path, target(&package_id))
        .await
        .unwrap();

    // Assert
    assert_eq!(report.uploaded_pages(), 0);
    assert_eq!(report.entries.len(), 2);
    assert!(worker.object_store.keys_with_prefix(TEST_BUCKET, "").is_empty());
    assert!(leftover_entries(&worker.scratch_root()).is_empty());
}

#[tokio::test]
async fn every_image_is_uploaded_under_contiguous_names() {
    let worker = TestWorker::new();
    let package_id = fake_package_id();
    let archive_path = write_archive(
        worker.scratch_dir.path(),
        &[
            ("scan_01.jpg", b"jpeg 1"),
            ("scan_02.jpg", b"jpeg 2"),
            ("scan_03.jpg", b"jpeg 3"),
            ("scan_04.jpg", b"jpeg 4"),
        ],
    );

    let report = worker
        .pipeline(NamingScheme::PackagePages)
        .process_batch(&archive_path, target(&package_id))
        .await
        .unwrap();

    assert_eq!(report.uploaded_pages(), 4);
    let expected: Vec<String> = (1..=4)
        .map(|index| format!("{}{}_pag{}.jpg", PREFIX, package_id, index))
        .collect();
    assert_eq!(
        worker.object_store.keys_with_prefix(TEST_BUCKET, PREFIX),
        expected
    );

    let first_page = worker
        .object_store
        .get(TEST_BUCKET, &expected[0])
        .unwrap();
    assert_eq!(first_page.content, b"jpeg 1");
    assert_eq!(first_page.content_type, "image/jpeg");
    assert!(leftover_entries(&worker.scratch_root()).is_empty());
}

#[tokio::test]
async fn a_failing_image_leaves_no_gap_in_the_numbering() {
    let worker = TestWorker::new();
    let package_id = fake_package_id();
    let archive_path = write_archive(
        worker.scratch_dir.path(),
        &[
            ("scan_01.jpg", b"jpeg 1"),
            ("scan_02_broken.jpg", b"not really a jpeg"),
            ("scan_03.jpg", b"jpeg 3"),
            ("scan_04.jpg", b"jpeg 4"),
        ],
    );

    let report = worker
        .pipeline(NamingScheme::PackagePages)
        .process_batch(&archive_path, target(&package_id))
        .await
        .unwrap();

    assert_eq!(report.uploaded_pages(), 3);
    let expected: Vec<String> = (1..=3)
        .map(|index| format!("{}{}_pag{}.jpg", PREFIX, package_id, index))
        .collect();
    assert_eq!(
        worker.object_store.keys_with_prefix(TEST_BUCKET, PREFIX),
        expected
    );
    // The image after the broken one takes its number
    assert_eq!(
        worker
            .object_store
            .get(TEST_BUCKET, &expected[1])
            .unwrap()
            .content,
        b"jpeg 3"
    );

    let broken = &report.entries[1];
    assert_eq!(broken.file_name, "scan_02_broken.jpg");
    assert!(broken.page_names.is_empty());
    assert!(broken.failure.is_some());
}

#[tokio::test]
async fn pdf_pages_and_images_share_the_page_counter() {
    let worker = TestWorker::new();
    let package_id = fake_package_id();
    let pdf = fake_pdf(3);
    let archive_path = write_archive(
        worker.scratch_dir.path(),
        &[
            ("a_cover.jpg", b"cover"),
            ("b_contract.pdf", pdf.as_slice()),
            ("c_receipt.JPEG", b"receipt"),
        ],
    );

    let report = worker
        .pipeline(NamingScheme::PackagePages)
        .process_batch(&archive_path, target(&package_id))
        .await
        .unwrap();

    assert_eq!(report.uploaded_pages(), 5);
    assert_eq!(
        report.entries[1].page_names,
        vec![
            format!("{}_pag2.jpg", package_id),
            format!("{}_pag3.jpg", package_id),
            format!("{}_pag4.jpg", package_id),
        ]
    );
    // Images keep their own (lowercased) extension
    assert_eq!(
        report.entries[2].page_names,
        vec![format!("{}_pag5.jpeg", package_id)]
    );
    assert_eq!(
        worker
            .object_store
            .get(TEST_BUCKET, &format!("{}{}_pag3.jpg", PREFIX, package_id))
            .unwrap()
            .content,
        b"page 2"
    );
    assert!(leftover_entries(&worker.scratch_root()).is_empty());
}

#[tokio::test]
async fn a_pdf_without_pages_is_skipped() {
    let worker = TestWorker::new();
    let package_id = fake_package_id();
    let empty_pdf = fake_pdf(0);
    let archive_path = write_archive(
        worker.scratch_dir.path(),
        &[("a_empty.pdf", empty_pdf.as_slice()), ("b_scan.jpg", b"scan")],
    );

    let report = worker
        .pipeline(NamingScheme::PackagePages)
        .process_batch(&archive_path, target(&package_id))
        .await
        .unwrap();

    assert_eq!(report.uploaded_pages(), 1);
    assert!(report.entries[0].failure.is_some());
    assert_eq!(
        report.entries[1].page_names,
        vec![format!("{}_pag1.jpg", package_id)]
    );
}

#[tokio::test]
async fn a_failed_upload_does_not_consume_a_number() {
    let worker = TestWorker::new();
    let package_id = fake_package_id();
    let archive_path = write_archive(
        worker.scratch_dir.path(),
        &[
            ("scan_01.jpg", b"jpeg 1"),
            ("scan_02.jpg", b"jpeg 2"),
            ("scan_03.jpg", b"jpeg 3"),
        ],
    );
    worker.object_store.fail_next_uploads(1);

    let report = worker
        .pipeline(NamingScheme::PackagePages)
        .process_batch(&archive_path, target(&package_id))
        .await
        .unwrap();

    assert_eq!(report.uploaded_pages(), 2);
    assert_eq!(
        worker.object_store.keys_with_prefix(TEST_BUCKET, PREFIX),
        vec![
            format!("{}{}_pag1.jpg", PREFIX, package_id),
            format!("{}{}_pag2.jpg", PREFIX, package_id),
        ]
    );
    assert!(report.entries[0].failure.is_some());
}

#[tokio::test]
async fn sequential_images_scheme_ignores_the_package_and_extension() {
    let worker = TestWorker::new();
    let package_id = fake_package_id();
    let archive_path = write_archive(
        worker.scratch_dir.path(),
        &[("page_a.jpeg", b"a"), ("page_b.jpg", b"b")],
    );

    let report = worker
        .pipeline(NamingScheme::SequentialImages)
        .process_batch(&archive_path, target(&package_id))
        .await
        .unwrap();

    assert_eq!(report.uploaded_pages(), 2);
    assert_eq!(
        worker.object_store.keys_with_prefix(TEST_BUCKET, PREFIX),
        vec![
            format!("{}imagem-1.jpg", PREFIX),
            format!("{}imagem-2.jpg", PREFIX),
        ]
    );
}

#[tokio::test]
async fn uploaded_names_parse_back_to_their_index() {
    let worker = TestWorker::new();
    let package_id = fake_package_id();
    let pdf = fake_pdf(2);
    let archive_path = write_archive(
        worker.scratch_dir.path(),
        &[("a.pdf", pdf.as_slice()), ("b.jpeg", b"b")],
    );

    let report = worker
        .pipeline(NamingScheme::PackagePages)
        .process_batch(&archive_path, target(&package_id))
        .await
        .unwrap();

    let parsed: Vec<(u32, String)> = report
        .entries
        .iter()
        .flat_map(|entry| entry.page_names.iter())
        .map(|name| {
            NamingScheme::PackagePages
                .parse_page_name(&package_id, name)
                .unwrap()
        })
        .collect();
    assert_eq!(
        parsed,
        vec![
            (1, "jpg".to_string()),
            (2, "jpg".to_string()),
            (3, "jpeg".to_string()),
        ]
    );
}

#[tokio::test]
async fn a_corrupt_archive_uploads_nothing_and_cleans_up() {
    let worker = TestWorker::new();
    let package_id = fake_package_id();
    let archive_path = worker.scratch_dir.path().join("corrupt.zip");
    std::fs::write(&archive_path, b"definitely not a zip archive").unwrap();

    let report = worker
        .pipeline(NamingScheme::PackagePages)
        .process_batch(&archive_path, target(&package_id))
        .await
        .unwrap();

    assert_eq!(report.uploaded_pages(), 0);
    assert!(report.archive_error.is_some());
    assert!(leftover_entries(&worker.scratch_root()).is_empty());
}

#[tokio::test]
async fn an_unusable_scratch_root_is_a_workspace_error() {
    let worker = TestWorker::new();
    let package_id = fake_package_id();
    let archive_path = write_archive(worker.scratch_dir.path(), &[("scan.jpg", b"scan")]);
    // A file where the scratch root directory should be
    std::fs::write(worker.scratch_root(), b"").unwrap();

    let result = worker
        .pipeline(NamingScheme::PackagePages)
        .process_batch(&archive_path, target(&package_id))
        .await;

    assert!(result.is_err());
}
