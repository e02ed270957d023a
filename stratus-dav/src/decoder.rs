use super::error::ParsingError;
use super::types::*;
use super::xml::{Element, QRead};

// ---- ROOT ----

/// Propfind request
impl QRead for PropFind {
    fn qread(xml: &Element) -> Result<Self, ParsingError> {
        if !xml.is("propfind") {
            return Err(ParsingError::TagNotFound);
        }

        for child in xml.elements() {
            match child.name.as_str() {
                "propname" => return Ok(PropFind::PropName),
                "allprop" => {
                    let include = xml
                        .child("include")
                        .map(|i| i.elements().map(|e| e.name.clone()).collect())
                        .unwrap_or_default();
                    return Ok(PropFind::AllProp(include));
                }
                "prop" => {
                    return Ok(PropFind::Prop(
                        child.elements().map(|e| e.name.clone()).collect(),
                    ))
                }
                other => {
                    tracing::debug!(name = other, "unknown propfind child, skipping");
                    continue;
                }
            }
        }

        // an empty propfind is treated as an allprop request
        match xml.has_elements() {
            false => Ok(PropFind::AllProp(vec![])),
            true => Err(ParsingError::MissingChild),
        }
    }
}

/// PROPPATCH request
impl QRead for PropertyUpdate {
    fn qread(xml: &Element) -> Result<Self, ParsingError> {
        if !xml.is("propertyupdate") {
            return Err(ParsingError::TagNotFound);
        }

        let mut instructions = vec![];
        for item in xml.elements() {
            let is_set = match item.name.as_str() {
                "set" => true,
                "remove" => false,
                other => {
                    tracing::debug!(name = other, "unknown propertyupdate child, skipping");
                    continue;
                }
            };
            let prop = item.child("prop").ok_or(ParsingError::MissingChild)?;
            for p in prop.elements() {
                instructions.push(match is_set {
                    true => Instruction::Set(p.name.clone(), PropValue::of(p)),
                    false => Instruction::Remove(p.name.clone()),
                });
            }
        }

        if instructions.is_empty() && !xml.has_elements() {
            return Err(ParsingError::MissingChild);
        }
        Ok(PropertyUpdate(instructions))
    }
}

/// LOCK request
impl QRead for LockInfo {
    fn qread(xml: &Element) -> Result<Self, ParsingError> {
        if !xml.is("lockinfo") {
            return Err(ParsingError::TagNotFound);
        }

        let lockscope = xml
            .child("lockscope")
            .ok_or(ParsingError::MissingChild)
            .and_then(LockScope::qread)?;
        let locktype = xml
            .child("locktype")
            .ok_or(ParsingError::MissingChild)
            .and_then(LockType::qread)?;
        let owner = xml.child("owner").cloned();

        Ok(LockInfo {
            lockscope,
            locktype,
            owner,
        })
    }
}

// ---- INNER ----

impl QRead for LockScope {
    fn qread(xml: &Element) -> Result<Self, ParsingError> {
        for e in xml.elements() {
            match e.name.as_str() {
                "exclusive" => return Ok(LockScope::Exclusive),
                "shared" => return Ok(LockScope::Shared),
                _ => continue,
            }
        }
        Err(ParsingError::InvalidValue)
    }
}

impl QRead for LockType {
    fn qread(xml: &Element) -> Result<Self, ParsingError> {
        match xml.child("write") {
            Some(_) => Ok(LockType::Write),
            None => Err(ParsingError::InvalidValue),
        }
    }
}

impl QRead for Href {
    fn qread(xml: &Element) -> Result<Self, ParsingError> {
        if !xml.is("href") {
            return Err(ParsingError::TagNotFound);
        }
        Ok(Href(xml.text().trim().to_string()))
    }
}

impl QRead for Depth {
    fn qread(xml: &Element) -> Result<Self, ParsingError> {
        Depth::parse(&xml.text()).ok_or(ParsingError::InvalidValue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{parse, Node};

    async fn decode<T: QRead>(src: &str) -> Result<T, ParsingError> {
        let tree = parse(src.as_bytes()).await?;
        T::qread(&tree)
    }

    #[tokio::test]
    async fn basic_propfind_propname() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<rando/>
<garbage><old/></garbage>
<D:propfind xmlns:D="DAV:">
    <D:propname/>
</D:propfind>
"#;
        // the first complete element is the root
        assert!(matches!(
            decode::<PropFind>(src).await,
            Err(ParsingError::TagNotFound)
        ));

        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:">
    <D:propname/>
</D:propfind>
"#;
        assert_eq!(decode::<PropFind>(src).await.unwrap(), PropFind::PropName);
    }

    #[tokio::test]
    async fn rfc_propfind_prop() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:">
    <D:prop xmlns:R="http://ns.example.com/boxschema/">
        <R:bigbox/>
        <R:author/>
        <D:getcontentlength/>
    </D:prop>
</D:propfind>"#;
        assert_eq!(
            decode::<PropFind>(src).await.unwrap(),
            PropFind::Prop(vec![
                "http://ns.example.com/boxschema/%%bigbox".into(),
                "http://ns.example.com/boxschema/%%author".into(),
                "getcontentlength".into(),
            ])
        );
    }

    #[tokio::test]
    async fn rfc_allprop_include() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:">
    <D:allprop/>
    <D:include>
        <D:supported-live-property-set/>
        <D:supported-report-set/>
    </D:include>
</D:propfind>"#;
        assert_eq!(
            decode::<PropFind>(src).await.unwrap(),
            PropFind::AllProp(vec![
                "supported-live-property-set".into(),
                "supported-report-set".into()
            ])
        );
        assert_eq!(
            decode::<PropFind>(r#"<propfind xmlns="DAV:"/>"#).await.unwrap(),
            PropFind::AllProp(vec![])
        );
    }

    #[tokio::test]
    async fn rfc_propertyupdate() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propertyupdate xmlns:D="DAV:"
        xmlns:Z="http://ns.example.com/standards/z39.50/">
    <D:set>
        <D:prop>
            <Z:Authors>
                <Z:Author>Jim Whitehead</Z:Author>
                <Z:Author>Roy Fielding</Z:Author>
            </Z:Authors>
        </D:prop>
    </D:set>
    <D:remove>
        <D:prop><Z:Copyright-Owner/></D:prop>
    </D:remove>
    <D:set>
        <D:prop><Z:Title>Draft</Z:Title></D:prop>
    </D:set>
</D:propertyupdate>"#;
        let got = decode::<PropertyUpdate>(src).await.unwrap();
        let names: Vec<&str> = got.0.iter().map(|i| i.name()).collect();
        assert_eq!(
            names,
            vec![
                "http://ns.example.com/standards/z39.50/%%Authors",
                "http://ns.example.com/standards/z39.50/%%Copyright-Owner",
                "http://ns.example.com/standards/z39.50/%%Title",
            ]
        );
        match &got.0[0] {
            Instruction::Set(_, PropValue::Xml(nodes)) => {
                let authors: Vec<String> = nodes
                    .iter()
                    .filter_map(|n| match n {
                        Node::Element(e) => Some(e.text()),
                        _ => None,
                    })
                    .collect();
                assert_eq!(authors, vec!["Jim Whitehead", "Roy Fielding"]);
            }
            other => panic!("unexpected instruction {:?}", other),
        }
        assert!(matches!(&got.0[1], Instruction::Remove(_)));
        assert_eq!(
            got.0[2],
            Instruction::Set(
                "http://ns.example.com/standards/z39.50/%%Title".into(),
                PropValue::text("Draft")
            )
        );
    }

    #[tokio::test]
    async fn rfc_lockinfo() {
        let src = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:lockinfo xmlns:D='DAV:'>
    <D:lockscope><D:exclusive/></D:lockscope>
    <D:locktype><D:write/></D:locktype>
    <D:owner>
        <D:href>http://example.org/~ejw/contact.html</D:href>
    </D:owner>
</D:lockinfo>"#;
        let got = decode::<LockInfo>(src).await.unwrap();
        assert_eq!(got.lockscope, LockScope::Exclusive);
        assert_eq!(got.locktype, LockType::Write);
        let owner = got.owner.unwrap();
        assert_eq!(
            Href::qread(owner.child("href").unwrap()).unwrap(),
            Href("http://example.org/~ejw/contact.html".into())
        );
    }

    #[tokio::test]
    async fn lockinfo_without_scope() {
        let src = r#"<D:lockinfo xmlns:D="DAV:"><D:locktype><D:write/></D:locktype></D:lockinfo>"#;
        assert!(matches!(
            decode::<LockInfo>(src).await,
            Err(ParsingError::MissingChild)
        ));
    }
}
