// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) Hack.bg. All rights reserved.

//! Contract identity across the four lifecycle stages.
//!
//! Each stage struct extends the previous one by flattening it, so a later
//! stage always carries every earlier field: [`ContractSource`] identifies
//! what to build, [`ContractTemplate`] adds the build result,
//! [`UploadedTemplate`] the upload result and [`ContractInstance`] the
//! instantiation result. [`ContractRecord`] is the flat union of all four,
//! used as the mutable working state of a contract and as its on-disk
//! receipt schema.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::Error;

/// The revision denoting "whatever is in the working tree right now".
pub const HEAD: &str = "HEAD";

/// Compute the code hash of a blob of WASM: its sha256, lowercase hex.
pub fn code_hash_of(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Identifies what to build.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// `None` is equivalent to [`HEAD`]: build the working tree in place.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
    #[serde(
        rename = "crate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub crate_name: Option<String>,
    #[serde(
        default,
        with = "comma_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub features: Vec<String>,
    /// Set when the artifact was built from a dirty working tree.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dirty: bool,
}

impl ContractSource {
    pub fn new(crate_name: impl Into<String>) -> Self {
        ContractSource {
            crate_name: Some(crate_name.into()),
            ..Default::default()
        }
    }

    pub fn revision(&self) -> &str {
        self.revision.as_deref().unwrap_or(HEAD)
    }
}

/// A source plus its build result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContractTemplate {
    #[serde(flatten)]
    pub source: ContractSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builder_id: Option<String>,
    /// Path or URL of the compiled artifact. Absent when the template was
    /// made from raw bytes that were never written to disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    /// sha256 of the artifact bytes, lowercase hex.
    pub code_hash: String,
}

/// A template plus its upload result on one chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadedTemplate {
    #[serde(flatten)]
    pub template: ContractTemplate,
    pub chain_id: String,
    /// Chain-assigned identifier of the uploaded code. Monotonic integer
    /// on the chain, carried as text.
    pub code_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_tx: Option<String>,
}

/// An uploaded template plus its instantiation result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContractInstance {
    #[serde(flatten)]
    pub uploaded: UploadedTemplate,
    /// `None` while the instantiation is pending inside a bundle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_by: Option<String>,
    pub init_msg: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_tx: Option<String>,
}

impl ContractInstance {
    /// The inter-contract wire form of this instance.
    pub fn link(&self) -> Result<ContractLink, Error> {
        let address =
            self.address.clone().ok_or(Error::LinkNoAddress)?;
        Ok(ContractLink {
            address,
            code_hash: self.uploaded.template.code_hash.clone(),
        })
    }
}

/// Minimal reference to an instantiated contract, as passed between
/// contracts on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractLink {
    pub address: String,
    pub code_hash: String,
}

/// A contract label: `(prefix "/")? name ("+" suffix)?`.
///
/// Labels are globally unique per chain. The prefix is the name of the
/// deployment that owns the instance.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Label {
    pub prefix: Option<String>,
    pub name: String,
    pub suffix: Option<String>,
}

impl Label {
    pub fn new(
        prefix: Option<&str>,
        name: &str,
        suffix: Option<&str>,
    ) -> Result<Self, Error> {
        if name.is_empty() {
            return Err(Error::NoInitLabel);
        }
        if name.contains('/') || name.contains('+') {
            return Err(Error::InvalidLabel(name.into()));
        }
        Ok(Label {
            prefix: prefix.map(str::to_owned),
            name: name.to_owned(),
            suffix: suffix.map(str::to_owned),
        })
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, "{prefix}/")?;
        }
        write!(f, "{}", self.name)?;
        if let Some(suffix) = &self.suffix {
            write!(f, "+{suffix}")?;
        }
        Ok(())
    }
}

impl FromStr for Label {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let (prefix, rest) = match s.split_once('/') {
            Some((prefix, rest)) => (Some(prefix), rest),
            None => (None, s),
        };
        let (name, suffix) = match rest.rsplit_once('+') {
            Some((name, suffix)) => (name, Some(suffix)),
            None => (rest, None),
        };
        Label::new(prefix, name, suffix)
    }
}

/// The flat union of all lifecycle fields: the working state of a contract
/// as it advances through the stages, and the schema of its receipt file.
///
/// Stages only ever add fields, so every mutation goes through the
/// `absorb_*` methods which fill blanks and never unset anything.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dirty: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
    #[serde(
        rename = "crate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub crate_name: Option<String>,
    #[serde(
        default,
        with = "comma_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub features: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builder_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_tx: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_msg: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_tx: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

impl ContractRecord {
    pub fn from_source(source: ContractSource) -> Self {
        ContractRecord {
            repository: source.repository,
            revision: source.revision,
            dirty: source.dirty,
            workspace: source.workspace,
            crate_name: source.crate_name,
            features: source.features,
            ..Default::default()
        }
    }

    pub fn source(&self) -> ContractSource {
        ContractSource {
            repository: self.repository.clone(),
            revision: self.revision.clone(),
            workspace: self.workspace.clone(),
            crate_name: self.crate_name.clone(),
            features: self.features.clone(),
            dirty: self.dirty,
        }
    }

    pub fn absorb_template(&mut self, template: &ContractTemplate) {
        fill(&mut self.repository, template.source.repository.clone());
        fill(&mut self.revision, template.source.revision.clone());
        fill(&mut self.workspace, template.source.workspace.clone());
        fill(&mut self.crate_name, template.source.crate_name.clone());
        if self.features.is_empty() {
            self.features = template.source.features.clone();
        }
        self.dirty = self.dirty || template.source.dirty;
        fill(&mut self.builder_id, template.builder_id.clone());
        fill(&mut self.artifact, template.artifact.clone());
        fill(&mut self.code_hash, Some(template.code_hash.clone()));
    }

    pub fn absorb_upload(&mut self, uploaded: &UploadedTemplate) {
        self.absorb_template(&uploaded.template);
        fill(&mut self.chain_id, Some(uploaded.chain_id.clone()));
        fill(&mut self.code_id, Some(uploaded.code_id.clone()));
        fill(&mut self.uploader_id, uploaded.uploader_id.clone());
        fill(&mut self.upload_by, uploaded.upload_by.clone());
        fill(&mut self.upload_tx, uploaded.upload_tx.clone());
    }

    pub fn absorb_instance(&mut self, instance: &ContractInstance) {
        self.absorb_upload(&instance.uploaded);
        fill(&mut self.address, instance.address.clone());
        fill(&mut self.label, Some(instance.label.clone()));
        fill(&mut self.prefix, instance.prefix.clone());
        fill(&mut self.name, Some(instance.name.clone()));
        fill(&mut self.suffix, instance.suffix.clone());
        fill(&mut self.init_by, instance.init_by.clone());
        fill(&mut self.init_msg, Some(instance.init_msg.clone()));
        fill(&mut self.init_tx, instance.init_tx.clone());
    }

    /// Project the build stage, if it has completed.
    pub fn template(&self) -> Option<ContractTemplate> {
        Some(ContractTemplate {
            source: self.source(),
            builder_id: self.builder_id.clone(),
            artifact: self.artifact.clone(),
            code_hash: self.code_hash.clone()?,
        })
    }

    /// Project the upload stage, if it has completed.
    pub fn uploaded(&self) -> Option<UploadedTemplate> {
        Some(UploadedTemplate {
            template: self.template()?,
            chain_id: self.chain_id.clone()?,
            code_id: self.code_id.clone()?,
            uploader_id: self.uploader_id.clone(),
            upload_by: self.upload_by.clone(),
            upload_tx: self.upload_tx.clone(),
        })
    }

    /// Project the instantiation stage, if it has completed.
    pub fn instance(&self) -> Option<ContractInstance> {
        Some(ContractInstance {
            uploaded: self.uploaded()?,
            address: Some(self.address.clone()?),
            label: self.label.clone()?,
            prefix: self.prefix.clone(),
            name: self.name.clone()?,
            suffix: self.suffix.clone(),
            init_by: self.init_by.clone(),
            init_msg: self.init_msg.clone()?,
            init_tx: self.init_tx.clone(),
        })
    }

    /// True iff every key present in the predicate compares equal to the
    /// corresponding field of this record. The empty predicate matches.
    pub fn matches(&self, predicate: &Value) -> bool {
        let this = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => return false,
        };
        match predicate {
            Value::Object(keys) => keys
                .iter()
                .all(|(k, v)| this.get(k).unwrap_or(&Value::Null) == v),
            Value::Null => true,
            _ => false,
        }
    }
}

/// Receipts carry the feature list as one comma-joined string.
mod comma_list {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        features: &[String],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&features.join(","))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<String>, D::Error> {
        let joined = String::deserialize(deserializer)?;
        Ok(joined
            .split(',')
            .filter(|f| !f.is_empty())
            .map(str::to_owned)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn label_composition_round_trips() -> Result<(), Error> {
        let label = Label::new(Some("deploy-1"), "token", Some("v2"))?;
        assert_eq!(label.to_string(), "deploy-1/token+v2");
        assert_eq!("deploy-1/token+v2".parse::<Label>()?, label);

        let bare: Label = "token".parse()?;
        assert_eq!(bare.prefix, None);
        assert_eq!(bare.name, "token");
        assert_eq!(bare.suffix, None);
        Ok(())
    }

    #[test]
    fn label_refuses_empty_and_reserved_names() {
        assert!(matches!(Label::new(None, "", None), Err(Error::NoInitLabel)));
        assert!(matches!(
            Label::new(None, "a/b", None),
            Err(Error::InvalidLabel(_))
        ));
    }

    #[test]
    fn matches_requires_all_provided_keys_to_be_equal() {
        let mut record = ContractRecord::from_source(ContractSource::new("echo"));
        record.code_hash = Some("abcd".into());

        assert!(record.matches(&json!({})));
        assert!(record.matches(&json!({ "crate": "echo" })));
        assert!(record.matches(&json!({ "crate": "echo", "code_hash": "abcd" })));
        assert!(!record.matches(&json!({ "crate": "echo", "code_hash": "ffff" })));
        assert!(!record.matches(&json!({ "address": "nowhere" })));
    }

    #[test]
    fn absorb_never_unsets_fields() {
        let mut record = ContractRecord::from_source(ContractSource::new("echo"));
        record.code_hash = Some("11".into());
        record.artifact = Some("a.wasm".into());

        let template = ContractTemplate {
            source: ContractSource::new("echo"),
            builder_id: Some("raw".into()),
            artifact: Some("b.wasm".into()),
            code_hash: "22".into(),
        };
        record.absorb_template(&template);

        // existing values win; blanks are filled
        assert_eq!(record.artifact.as_deref(), Some("a.wasm"));
        assert_eq!(record.code_hash.as_deref(), Some("11"));
        assert_eq!(record.builder_id.as_deref(), Some("raw"));
    }

    #[test]
    fn features_serialize_comma_joined() -> Result<(), Error> {
        let mut source = ContractSource::new("amm");
        source.features = vec!["staking".into(), "rewards".into()];
        let value = serde_json::to_value(&source)?;
        assert_eq!(value["features"], json!("staking,rewards"));
        let back: ContractSource = serde_json::from_value(value)?;
        assert_eq!(back.features, source.features);
        Ok(())
    }

    #[test]
    fn link_requires_address() {
        // the shape of a provisional instance collected inside a bundle
        let provisional = ContractInstance {
            uploaded: UploadedTemplate {
                template: ContractTemplate {
                    source: ContractSource::new("echo"),
                    builder_id: None,
                    artifact: None,
                    code_hash: "aa".into(),
                },
                chain_id: "test".into(),
                code_id: "1".into(),
                uploader_id: None,
                upload_by: None,
                upload_tx: None,
            },
            address: None,
            label: "x".into(),
            prefix: None,
            name: "x".into(),
            suffix: None,
            init_by: None,
            init_msg: json!({}),
            init_tx: None,
        };
        assert!(matches!(provisional.link(), Err(Error::LinkNoAddress)));

        let live = ContractInstance {
            address: Some("test1somewhere".into()),
            ..provisional
        };
        let link = live.link().expect("address is present");
        assert_eq!(link.address, "test1somewhere");
        assert_eq!(link.code_hash, "aa");
    }
}
