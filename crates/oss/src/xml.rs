//! XML bodies exchanged with the service

use quick_xml::escape::partial_escape;
use serde::Deserialize;

use oc_core::{Error, ListEntry, ListPage, Result};

/// Response of `GET /?prefix=..&marker=..`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListBucketResult {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub marker: String,
    #[serde(default)]
    pub max_keys: Option<String>,
    #[serde(default)]
    pub delimiter: String,
    #[serde(default)]
    pub is_truncated: bool,
    #[serde(default)]
    pub next_marker: Option<String>,
    #[serde(rename = "Contents", default)]
    pub contents: Vec<ListContents>,
    #[serde(rename = "CommonPrefixes", default)]
    pub common_prefixes: Vec<CommonPrefix>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListContents {
    pub key: String,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(rename = "ETag", default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub storage_class: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommonPrefix {
    pub prefix: String,
}

impl ListBucketResult {
    pub fn into_page(self, bucket: &str) -> ListPage {
        let entries = self
            .contents
            .into_iter()
            .map(|c| ListEntry {
                last_modified: c.last_modified.as_deref().and_then(|s| s.parse().ok()),
                key: c.key,
                etag: c.etag,
                size: c.size,
                storage_class: c.storage_class.filter(|s| !s.is_empty()),
            })
            .collect();

        ListPage {
            bucket: if self.name.is_empty() {
                bucket.to_string()
            } else {
                self.name
            },
            prefix: self.prefix,
            marker: self.marker,
            delimiter: self.delimiter,
            max_keys: self.max_keys.and_then(|v| v.trim().parse().ok()),
            is_truncated: self.is_truncated,
            entries,
            common_prefixes: self.common_prefixes.into_iter().map(|p| p.prefix).collect(),
            next_marker: self.next_marker.filter(|m| !m.is_empty()),
        }
    }
}

/// Response of `POST key?uploads`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InitiateMultipartUploadResult {
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub upload_id: String,
}

/// Response of `POST key?uploadId=..`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompleteMultipartUploadResult {
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub key: String,
    #[serde(rename = "ETag", default)]
    pub etag: String,
}

/// Response of a server-side copy
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CopyObjectResult {
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(rename = "ETag", default)]
    pub etag: Option<String>,
}

/// Deserialize a response body
pub fn parse<T>(body: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let text = std::str::from_utf8(body)
        .map_err(|e| Error::Parse(format!("Response body is not UTF-8: {e}")))?;
    quick_xml::de::from_str(text).map_err(|e| Error::Parse(e.to_string()))
}

/// Build the completion manifest, part numbers ascending from 1
pub fn complete_manifest(etags: &[String]) -> String {
    let mut body = String::from("<CompleteMultipartUpload>");
    for (index, etag) in etags.iter().enumerate() {
        body.push_str(&format!(
            "<Part><PartNumber>{}</PartNumber><ETag>{}</ETag></Part>",
            index + 1,
            partial_escape(etag.as_str())
        ));
    }
    body.push_str("</CompleteMultipartUpload>");
    body
}

/// Build a quiet multi-delete body
pub fn delete_body<S: AsRef<str>>(keys: &[S]) -> String {
    let mut body = String::from("<Delete><Quiet>true</Quiet>");
    for key in keys {
        body.push_str("<Object><Key>");
        body.push_str(&partial_escape(key.as_ref()));
        body.push_str("</Key></Object>");
    }
    body.push_str("</Delete>");
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <Name>photos</Name>
  <Prefix>2024/</Prefix>
  <Marker></Marker>
  <MaxKeys>2</MaxKeys>
  <Delimiter>/</Delimiter>
  <IsTruncated>true</IsTruncated>
  <Contents>
    <Key>2024/a.jpg</Key>
    <LastModified>2024-05-01T10:00:00.000Z</LastModified>
    <ETag>"5B3C1A2E053D763E1B002CC607C5A0FE"</ETag>
    <Type>Normal</Type>
    <Size>344606</Size>
    <StorageClass>Standard</StorageClass>
    <Owner><ID>1</ID><DisplayName>1</DisplayName></Owner>
  </Contents>
  <Contents>
    <Key>2024/b.jpg</Key>
    <LastModified>2024-05-02T10:00:00.000Z</LastModified>
    <ETag>"AAAA"</ETag>
    <Size>10</Size>
    <StorageClass>Standard</StorageClass>
  </Contents>
  <CommonPrefixes><Prefix>2024/raw/</Prefix></CommonPrefixes>
</ListBucketResult>"#;

    #[test]
    fn test_parse_listing() {
        let result: ListBucketResult = parse(LISTING.as_bytes()).unwrap();
        let page = result.into_page("ignored");

        assert_eq!(page.bucket, "photos");
        assert_eq!(page.prefix, "2024/");
        assert_eq!(page.max_keys, Some(2));
        assert!(page.is_truncated);
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0].size, 344606);
        assert_eq!(page.entries[0].storage_class.as_deref(), Some("Standard"));
        assert_eq!(
            page.entries[0].last_modified,
            Some("2024-05-01T10:00:00Z".parse().unwrap())
        );
        assert_eq!(page.common_prefixes, vec!["2024/raw/"]);
        // the prefix sorts after the last key
        assert_eq!(page.next_marker(), Some("2024/raw/"));
    }

    #[test]
    fn test_parse_listing_next_marker() {
        let body = "<ListBucketResult><Name>b</Name><IsTruncated>true</IsTruncated>\
                    <NextMarker>b/</NextMarker>\
                    <Contents><Key>a.txt</Key><Size>1</Size></Contents>\
                    <CommonPrefixes><Prefix>b/</Prefix></CommonPrefixes></ListBucketResult>";
        let page = parse::<ListBucketResult>(body.as_bytes())
            .unwrap()
            .into_page("b");
        assert_eq!(page.next_marker.as_deref(), Some("b/"));
        assert_eq!(page.next_marker(), Some("b/"));
    }

    #[test]
    fn test_parse_empty_listing() {
        let body = "<ListBucketResult><Name>b</Name><IsTruncated>false</IsTruncated></ListBucketResult>";
        let page = parse::<ListBucketResult>(body.as_bytes())
            .unwrap()
            .into_page("b");
        assert!(page.entries.is_empty());
        assert_eq!(page.next_marker(), None);
    }

    #[test]
    fn test_parse_initiate() {
        let body = "<InitiateMultipartUploadResult><Bucket>b</Bucket><Key>big.bin</Key>\
                    <UploadId>0004B9894A22E5B1888A1E29F823</UploadId></InitiateMultipartUploadResult>";
        let init: InitiateMultipartUploadResult = parse(body.as_bytes()).unwrap();
        assert_eq!(init.upload_id, "0004B9894A22E5B1888A1E29F823");
    }

    #[test]
    fn test_malformed_body_is_parse_error() {
        let err = parse::<CompleteMultipartUploadResult>(
            b"<CompleteMultipartUploadResult><Location>x</Bucket>",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));

        let err = parse::<CompleteMultipartUploadResult>(&[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_complete_manifest_numbers_parts_from_one() {
        let manifest = complete_manifest(&["\"e1\"".to_string(), "\"e2\"".to_string()]);
        assert_eq!(
            manifest,
            "<CompleteMultipartUpload>\
             <Part><PartNumber>1</PartNumber><ETag>\"e1\"</ETag></Part>\
             <Part><PartNumber>2</PartNumber><ETag>\"e2\"</ETag></Part>\
             </CompleteMultipartUpload>"
        );
    }

    #[test]
    fn test_delete_body_escapes_keys() {
        let body = delete_body(&["a&b.txt", "c.txt"]);
        assert_eq!(
            body,
            "<Delete><Quiet>true</Quiet>\
             <Object><Key>a&amp;b.txt</Key></Object>\
             <Object><Key>c.txt</Key></Object></Delete>"
        );
    }
}
