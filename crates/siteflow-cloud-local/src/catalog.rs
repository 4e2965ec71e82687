//! Resource types served by the local control plane

use serde_json::{Value, json};
use siteflow_cloud::ResourceSchema;
use std::collections::{BTreeMap, HashMap};

pub const S3_BUCKET: &str = "s3-bucket";
pub const S3_BUCKET_WEBSITE: &str = "s3-bucket-website";
pub const S3_BUCKET_PUBLIC_ACCESS_BLOCK: &str = "s3-bucket-public-access-block";
pub const S3_BUCKET_POLICY: &str = "s3-bucket-policy";
pub const ORIGIN_ACCESS_IDENTITY: &str = "cloudfront-origin-access-identity";
pub const DISTRIBUTION: &str = "cloudfront-distribution";

/// Hosted zone every CloudFront distribution lives in
pub const CLOUDFRONT_HOSTED_ZONE_ID: &str = "Z2FDTNDATAQYW2";

/// Schemas for all supported resource types, keyed by type
pub fn schemas() -> HashMap<String, ResourceSchema> {
    [
        ResourceSchema::new(S3_BUCKET)
            .required(&["bucket"])
            .force_new(&["bucket"])
            .computed(&[
                "arn",
                "bucket_domain_name",
                "bucket_regional_domain_name",
                "region",
            ]),
        ResourceSchema::new(S3_BUCKET_WEBSITE)
            .required(&["bucket", "index_document"])
            .force_new(&["bucket"])
            .computed(&["website_endpoint", "website_domain"]),
        ResourceSchema::new(S3_BUCKET_PUBLIC_ACCESS_BLOCK)
            .required(&["bucket"])
            .force_new(&["bucket"]),
        ResourceSchema::new(S3_BUCKET_POLICY)
            .required(&["bucket", "policy"])
            .force_new(&["bucket"]),
        ResourceSchema::new(ORIGIN_ACCESS_IDENTITY).computed(&[
            "iam_arn",
            "cloudfront_access_identity_path",
        ]),
        ResourceSchema::new(DISTRIBUTION)
            .required(&["origin_domain_name"])
            .force_new(&["origin_id"])
            .computed(&["arn", "domain_name", "hosted_zone_id", "status"]),
    ]
    .into_iter()
    .map(|schema| (schema.resource_type.clone(), schema))
    .collect()
}

/// Types whose object id is the bucket name
pub fn is_bucket_scoped(resource_type: &str) -> bool {
    matches!(
        resource_type,
        S3_BUCKET | S3_BUCKET_WEBSITE | S3_BUCKET_PUBLIC_ACCESS_BLOCK | S3_BUCKET_POLICY
    )
}

/// Attributes the control plane assigns to an object with the given id
pub fn computed_attributes(resource_type: &str, id: &str, region: &str) -> BTreeMap<String, Value> {
    let mut attrs = BTreeMap::new();
    let mut set = |name: &str, value: String| {
        attrs.insert(name.to_string(), json!(value));
    };

    match resource_type {
        S3_BUCKET => {
            set("arn", format!("arn:aws:s3:::{}", id));
            set("bucket_domain_name", format!("{}.s3.amazonaws.com", id));
            set(
                "bucket_regional_domain_name",
                format!("{}.s3.{}.amazonaws.com", id, region),
            );
            set("region", region.to_string());
        }
        S3_BUCKET_WEBSITE => {
            set(
                "website_endpoint",
                format!("{}.s3-website-{}.amazonaws.com", id, region),
            );
            set("website_domain", format!("s3-website-{}.amazonaws.com", region));
        }
        ORIGIN_ACCESS_IDENTITY => {
            set(
                "iam_arn",
                format!(
                    "arn:aws:iam::cloudfront:user/CloudFront Origin Access Identity {}",
                    id
                ),
            );
            set(
                "cloudfront_access_identity_path",
                format!("origin-access-identity/cloudfront/{}", id),
            );
        }
        DISTRIBUTION => {
            set(
                "arn",
                format!("arn:aws:cloudfront::000000000000:distribution/{}", id),
            );
            set(
                "domain_name",
                format!("d{}.cloudfront.net", id.to_lowercase()),
            );
            set("hosted_zone_id", CLOUDFRONT_HOSTED_ZONE_ID.to_string());
            set("status", "Deployed".to_string());
        }
        _ => {}
    }

    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_type_has_a_schema() {
        let schemas = schemas();
        for resource_type in [
            S3_BUCKET,
            S3_BUCKET_WEBSITE,
            S3_BUCKET_PUBLIC_ACCESS_BLOCK,
            S3_BUCKET_POLICY,
            ORIGIN_ACCESS_IDENTITY,
            DISTRIBUTION,
        ] {
            assert!(schemas.contains_key(resource_type), "{}", resource_type);
        }
        assert_eq!(schemas.len(), 6);
    }

    #[test]
    fn test_bucket_computed_attributes() {
        let attrs = computed_attributes(S3_BUCKET, "my-site", "ap-northeast-1");
        assert_eq!(attrs["arn"], json!("arn:aws:s3:::my-site"));
        assert_eq!(
            attrs["bucket_regional_domain_name"],
            json!("my-site.s3.ap-northeast-1.amazonaws.com")
        );
    }

    #[test]
    fn test_distribution_domain_is_lowercase() {
        let attrs = computed_attributes(DISTRIBUTION, "E00000000002A", "us-east-1");
        assert_eq!(attrs["domain_name"], json!("de00000000002a.cloudfront.net"));
        assert_eq!(attrs["hosted_zone_id"], json!(CLOUDFRONT_HOSTED_ZONE_ID));
    }

    #[test]
    fn test_policy_has_no_computed_attributes() {
        assert!(computed_attributes(S3_BUCKET_POLICY, "b", "us-east-1").is_empty());
        assert!(is_bucket_scoped(S3_BUCKET_POLICY));
        assert!(!is_bucket_scoped(DISTRIBUTION));
    }
}
